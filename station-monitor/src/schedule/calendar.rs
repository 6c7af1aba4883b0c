/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Schedule start/stop times.
//!
//! `MM-DD[ HH:MM[:SS]]` recurs every year; `YYYY-MM-DD[ HH:MM[:SS]]` is a
//! single instant.  All times are UTC.

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, TimeZone, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOfYear {
    Annual {
        month: u32,
        day: u32,
        time: NaiveTime,
    },
    Fixed(DateTime<Utc>),
}

fn parse_time(text: Option<&str>) -> Option<NaiveTime> {
    match text {
        None => Some(NaiveTime::MIN),
        Some(t) => NaiveTime::parse_from_str(t, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
            .ok(),
    }
}

impl TimeOfYear {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (date, time) = match text.split_once([' ', 'T']) {
            Some((d, t)) => (d, Some(t.trim())),
            None => (text, None),
        };
        let time = parse_time(time)?;

        let fields: Vec<&str> = date.split('-').collect();
        match fields.as_slice() {
            [month, day] => {
                let month: u32 = month.parse().ok()?;
                let day: u32 = day.parse().ok()?;
                // 2000 is a leap year, so 02-29 validates.
                NaiveDate::from_ymd_opt(2000, month, day)?;
                Some(Self::Annual { month, day, time })
            }
            [year, month, day] => {
                let date =
                    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)?;
                Some(Self::Fixed(Utc.from_utc_datetime(&date.and_time(time))))
            }
            _ => None,
        }
    }

    pub fn is_annual(&self) -> bool {
        matches!(self, Self::Annual { .. })
    }

    /// The instant this time falls on in `year`.  February 29 resolves to
    /// February 28 in common years.
    pub fn in_year(&self, year: i32) -> Option<DateTime<Utc>> {
        match *self {
            Self::Fixed(at) => Some(at),
            Self::Annual { month, day, time } => {
                let date = NaiveDate::from_ymd_opt(year, month, day)
                    .or_else(|| NaiveDate::from_ymd_opt(year, month, day - 1))?;
                Some(Utc.from_utc_datetime(&date.and_time(time)))
            }
        }
    }
}

/// `at` moved one calendar year later.
pub fn add_year(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    at.checked_add_months(Months::new(12))
}

/// The calendar year of `at`.
pub fn year_of(at: DateTime<Utc>) -> i32 {
    at.year()
}
