/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Window predicates: "should the instrument be on right now", evaluated
//! against the current schedule.
//!
//! | Predicate | In window when |
//! |---|---|
//! | [`PeriodicWindow`] | the schedule's wall-clock sub-window is open |
//! | [`SolarWindow`] | near a solar transit, or the sun is within the angle bounds |
//! | [`NightWindow`] | the sun is low enough, or sunset is close |
//! | [`PowerWindow`] | measured power is at least `power.good.watts` |
//!
//! Predicates that depend on the location service or the cache report
//! missing data once and then stay quiet until it comes back.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use station_services::client::{CacheApi, LocationApi};

use crate::latch::ReportLatch;
use crate::lookup::LookupChain;
use crate::schedule::Schedule;
use crate::solar::{Position, Setting, SolarEphemeris};

#[tonic::async_trait]
pub trait WindowPredicate: Send {
    async fn in_window(&mut self, schedule: &Schedule, lookup: &LookupChain, now: DateTime<Utc>)
        -> bool;
}

// ── Solar checks ──────────────────────────────────────────────────────────────

/// Whether `now` lies within `span` centred on `transit`.  With
/// `repeat_days`, only transits on a day-of-year divisible by it count.
pub fn in_time_span(
    transit: DateTime<Utc>,
    now: DateTime<Utc>,
    span: Duration,
    repeat_days: Option<u32>,
) -> bool {
    if let Some(days) = repeat_days {
        if transit.ordinal() % days != 0 {
            return false;
        }
    }
    let Ok(half) = chrono::Duration::from_std(span / 2) else {
        return false;
    };
    transit - half <= now && now < transit + half
}

/// Transit window first, then the angle bounds, then the wider transit
/// window.
pub fn solar_window_check(
    schedule: &Schedule,
    ephemeris: &dyn SolarEphemeris,
    pos: Position,
    now: DateTime<Utc>,
) -> bool {
    let prev = ephemeris.previous_transit(pos, now);
    let next = ephemeris.next_transit(pos, now);
    let near_transit = |span: Duration| {
        in_time_span(prev, now, span, schedule.repeat_days)
            || in_time_span(next, now, span, schedule.repeat_days)
    };

    if near_transit(schedule.window_min) {
        debug!(schedule = %schedule.name, "within minimum transit window");
        return true;
    }

    let angle = ephemeris.altitude(pos, now);
    if schedule.min_solar_angle.is_some_and(|min| angle < min) {
        debug!(schedule = %schedule.name, angle, "sun below minimum angle");
        return false;
    }
    if schedule.max_solar_angle.is_some_and(|max| angle >= max) {
        debug!(schedule = %schedule.name, angle, "sun above maximum angle");
        return false;
    }

    schedule.window_max.map_or(true, near_transit)
}

async fn fetch_position(location: &dyn LocationApi, latch: &mut ReportLatch) -> Option<Position> {
    let fix = match location.best().await {
        Ok(fix) => fix,
        Err(e) => {
            if latch.trip() {
                warn!("location service unavailable: {}", e);
            }
            return None;
        }
    };
    match fix {
        Some(fix) => {
            if latch.clear() {
                info!(src = %fix.src, "location fix available");
            }
            Some(Position::from(&fix))
        }
        None => {
            if latch.trip() {
                warn!("no location fix, reporting out of window");
            }
            None
        }
    }
}

// ── Predicates ────────────────────────────────────────────────────────────────

/// Wall-clock sub-window only; in window when none is configured.
#[derive(Debug, Default)]
pub struct PeriodicWindow;

#[tonic::async_trait]
impl WindowPredicate for PeriodicWindow {
    async fn in_window(&mut self, schedule: &Schedule, _: &LookupChain, now: DateTime<Utc>) -> bool {
        schedule.in_periodic_window(now)
    }
}

pub struct SolarWindow {
    location: Arc<dyn LocationApi>,
    ephemeris: Arc<dyn SolarEphemeris>,
    latch: ReportLatch,
}

impl SolarWindow {
    pub fn new(location: Arc<dyn LocationApi>, ephemeris: Arc<dyn SolarEphemeris>) -> Self {
        Self {
            location,
            ephemeris,
            latch: ReportLatch::new(),
        }
    }
}

#[tonic::async_trait]
impl WindowPredicate for SolarWindow {
    async fn in_window(&mut self, schedule: &Schedule, _: &LookupChain, now: DateTime<Utc>) -> bool {
        match fetch_position(self.location.as_ref(), &mut self.latch).await {
            Some(pos) => solar_window_check(schedule, self.ephemeris.as_ref(), pos, now),
            None => false,
        }
    }
}

pub struct NightWindow {
    location: Arc<dyn LocationApi>,
    ephemeris: Arc<dyn SolarEphemeris>,
    latch: ReportLatch,
}

impl NightWindow {
    pub fn new(location: Arc<dyn LocationApi>, ephemeris: Arc<dyn SolarEphemeris>) -> Self {
        Self {
            location,
            ephemeris,
            latch: ReportLatch::new(),
        }
    }
}

#[tonic::async_trait]
impl WindowPredicate for NightWindow {
    async fn in_window(&mut self, schedule: &Schedule, _: &LookupChain, now: DateTime<Utc>) -> bool {
        let Some(pos) = fetch_position(self.location.as_ref(), &mut self.latch).await else {
            return false;
        };
        let Some(min) = schedule.min_solar_angle else {
            return false;
        };
        if self.ephemeris.altitude(pos, now) <= min {
            return true;
        }
        let Some(lead) = schedule.start_offset else {
            return false;
        };
        match self.ephemeris.next_setting(pos, now, min) {
            Setting::AlwaysUp => false,
            Setting::NeverUp => true,
            Setting::At(setting) => chrono::Duration::from_std(lead)
                .map(|lead| now >= setting - lead)
                .unwrap_or(false),
        }
    }
}

/// Measured power from the cache, in watts.
///
/// Reads the `power.field` member of the `power.key` cache entry (or the
/// entry itself when it is a bare number).
pub async fn power_watts(cache: &dyn CacheApi, lookup: &LookupChain) -> Option<f64> {
    let key: String = lookup.get("power.key").ok().flatten()?;
    let field: String = lookup.get("power.field").ok().flatten()?;
    match cache.get(&key).await {
        Ok(Value::Number(n)) => n.as_f64(),
        Ok(value) => value.get(&field).and_then(Value::as_f64),
        Err(e) => {
            debug!(key = %key, "power reading unavailable: {}", e);
            None
        }
    }
}

/// Whether power is at least `power.good.watts`.  A missing reading counts
/// as zero watts.
pub async fn power_good(cache: &dyn CacheApi, lookup: &LookupChain, latch: &mut ReportLatch) -> bool {
    let watts = match power_watts(cache, lookup).await {
        Some(w) => {
            if latch.clear() {
                info!(watts = w, "power reading available");
            }
            w
        }
        None => {
            if latch.trip() {
                warn!("no power reading, assuming 0 W");
            }
            0.0
        }
    };
    let threshold = lookup.get_or("power.good.watts", 20.0).unwrap_or(20.0);
    watts >= threshold
}

pub struct PowerWindow {
    cache: Arc<dyn CacheApi>,
    latch: ReportLatch,
}

impl PowerWindow {
    pub fn new(cache: Arc<dyn CacheApi>) -> Self {
        Self {
            cache,
            latch: ReportLatch::new(),
        }
    }
}

#[tonic::async_trait]
impl WindowPredicate for PowerWindow {
    async fn in_window(&mut self, _: &Schedule, lookup: &LookupChain, _: DateTime<Utc>) -> bool {
        power_good(self.cache.as_ref(), lookup, &mut self.latch).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
