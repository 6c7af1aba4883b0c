/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Solar position.
//!
//! [`SolarEphemeris`] is the boundary the window predicates consume.
//! [`NoaaEphemeris`] implements it with the NOAA general solar position
//! approximation (equation of time and declination as Fourier series of the
//! fractional year).  Transit times are good to about a minute, which is
//! well inside any operating window.

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use station_services::proto::station_v1::Fix;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

impl From<&Fix> for Position {
    fn from(fix: &Fix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
        }
    }
}

/// Next time the sun drops through a given altitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    At(DateTime<Utc>),
    /// The sun stays above the altitude all day.
    AlwaysUp,
    /// The sun never reaches the altitude.
    NeverUp,
}

pub trait SolarEphemeris: Send + Sync {
    /// Altitude of the sun above the horizon, in degrees.
    fn altitude(&self, pos: Position, at: DateTime<Utc>) -> f64;

    /// Most recent solar transit at or before `at`.
    fn previous_transit(&self, pos: Position, at: DateTime<Utc>) -> DateTime<Utc>;

    /// First solar transit after `at`.
    fn next_transit(&self, pos: Position, at: DateTime<Utc>) -> DateTime<Utc>;

    /// First time after `at` the sun sinks below `horizon` degrees.
    fn next_setting(&self, pos: Position, at: DateTime<Utc>, horizon: f64) -> Setting;
}

// ── NOAA approximation ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct NoaaEphemeris;

fn days_in_year(year: i32) -> f64 {
    if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
        366.0
    } else {
        365.0
    }
}

/// Fractional year in radians.
fn gamma(date: NaiveDate, hour: f64) -> f64 {
    2.0 * PI / days_in_year(date.year()) * (date.ordinal0() as f64 + (hour - 12.0) / 24.0)
}

/// Equation of time in minutes.
fn equation_of_time(g: f64) -> f64 {
    229.18
        * (0.000075 + 0.001868 * g.cos()
            - 0.032077 * g.sin()
            - 0.014615 * (2.0 * g).cos()
            - 0.040849 * (2.0 * g).sin())
}

/// Solar declination in radians.
fn declination(g: f64) -> f64 {
    0.006918 - 0.399912 * g.cos() + 0.070257 * g.sin() - 0.006758 * (2.0 * g).cos()
        + 0.000907 * (2.0 * g).sin()
        - 0.002697 * (3.0 * g).cos()
        + 0.00148 * (3.0 * g).sin()
}

fn at_minutes(date: NaiveDate, minutes: f64) -> DateTime<Utc> {
    let midnight = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN));
    midnight + Duration::milliseconds((minutes * 60_000.0).round() as i64)
}

/// Transit on `date`, in minutes after UTC midnight.
fn transit_minutes(date: NaiveDate, longitude: f64) -> f64 {
    let approx_hour = 12.0 - longitude / 15.0;
    720.0 - 4.0 * longitude - equation_of_time(gamma(date, approx_hour))
}

fn transit_on(date: NaiveDate, longitude: f64) -> DateTime<Utc> {
    at_minutes(date, transit_minutes(date, longitude))
}

enum DailySetting {
    At(DateTime<Utc>),
    AlwaysUp,
    NeverUp,
}

fn setting_on(date: NaiveDate, pos: Position, horizon: f64) -> DailySetting {
    let noon = transit_minutes(date, pos.longitude);
    let decl = declination(gamma(date, noon / 60.0));
    let lat = pos.latitude.to_radians();
    let cos_ha = (horizon.to_radians().sin() - lat.sin() * decl.sin()) / (lat.cos() * decl.cos());
    if cos_ha > 1.0 {
        DailySetting::NeverUp
    } else if cos_ha < -1.0 {
        DailySetting::AlwaysUp
    } else {
        DailySetting::At(at_minutes(date, noon + 4.0 * cos_ha.acos().to_degrees()))
    }
}

impl SolarEphemeris for NoaaEphemeris {
    fn altitude(&self, pos: Position, at: DateTime<Utc>) -> f64 {
        let date = at.date_naive();
        let hour = at.hour() as f64 + at.minute() as f64 / 60.0 + at.second() as f64 / 3600.0;
        let g = gamma(date, hour);
        let decl = declination(g);

        let true_solar_minutes = hour * 60.0 + equation_of_time(g) + 4.0 * pos.longitude;
        let hour_angle = (true_solar_minutes / 4.0 - 180.0).to_radians();

        let lat = pos.latitude.to_radians();
        let cos_zenith = lat.sin() * decl.sin() + lat.cos() * decl.cos() * hour_angle.cos();
        90.0 - cos_zenith.clamp(-1.0, 1.0).acos().to_degrees()
    }

    fn previous_transit(&self, pos: Position, at: DateTime<Utc>) -> DateTime<Utc> {
        let today = at.date_naive();
        (-2..=1)
            .filter_map(|d| today.checked_add_signed(Duration::days(d)))
            .map(|date| transit_on(date, pos.longitude))
            .filter(|t| *t <= at)
            .max()
            .unwrap_or_else(|| at - Duration::days(1))
    }

    fn next_transit(&self, pos: Position, at: DateTime<Utc>) -> DateTime<Utc> {
        let today = at.date_naive();
        (-1..=2)
            .filter_map(|d| today.checked_add_signed(Duration::days(d)))
            .map(|date| transit_on(date, pos.longitude))
            .filter(|t| *t > at)
            .min()
            .unwrap_or_else(|| at + Duration::days(1))
    }

    fn next_setting(&self, pos: Position, at: DateTime<Utc>, horizon: f64) -> Setting {
        let today = at.date_naive();
        for offset in -1..=2 {
            let Some(date) = today.checked_add_signed(Duration::days(offset)) else {
                continue;
            };
            match setting_on(date, pos, horizon) {
                DailySetting::At(t) if t > at => return Setting::At(t),
                DailySetting::AlwaysUp if offset >= 0 => return Setting::AlwaysUp,
                DailySetting::NeverUp if offset >= 0 => return Setting::NeverUp,
                _ => {}
            }
        }
        Setting::NeverUp
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
