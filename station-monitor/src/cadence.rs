/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Sample cadence selection inside the current schedule.
//!
//! `DayNight` and `Power` pick between two prefixed option sets
//! (`day.sample.rate` / `night.sample.rate`, `power.good.sample.rate` /
//! `power.low.sample.rate`), falling back to the schedule's own cadence for
//! anything not set.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use station_services::client::{CacheApi, LocationApi};

use crate::latch::ReportLatch;
use crate::lookup::LookupChain;
use crate::schedule::{SampleCadence, Schedule};
use crate::solar::{Position, SolarEphemeris};
use crate::window::{power_good, solar_window_check};

pub enum CadenceSource {
    Fixed,
    DayNight {
        location: Arc<dyn LocationApi>,
        ephemeris: Arc<dyn SolarEphemeris>,
    },
    Power {
        cache: Arc<dyn CacheApi>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub cadence: SampleCadence,
    /// The selected state changed since the previous call; the next sample
    /// time should be recomputed.
    pub changed: bool,
}

pub struct CadenceSelector {
    source: CadenceSource,
    state: Option<&'static str>,
    latch: ReportLatch,
}

/// The schedule cadence overridden by `<prefix>sample.*` options.  A zero
/// or unreadable rate keeps the schedule's rate.
pub fn prefixed_cadence(base: SampleCadence, lookup: &LookupChain, prefix: &str) -> SampleCadence {
    let key = |name: &str| format!("{}sample.{}", prefix, name);
    let rate = match lookup.duration(&key("rate")) {
        Ok(Some(rate)) if !rate.is_zero() => rate,
        Ok(_) => base.rate,
        Err(e) => {
            warn!("{}", e);
            base.rate
        }
    };
    SampleCadence {
        rate,
        sync: lookup.get_or(&key("sync"), base.sync).unwrap_or(base.sync),
        offset: lookup
            .duration_or(&key("offset"), base.offset)
            .unwrap_or(base.offset),
    }
}

impl CadenceSelector {
    pub fn new(source: CadenceSource) -> Self {
        Self {
            source,
            state: None,
            latch: ReportLatch::new(),
        }
    }

    pub fn fixed() -> Self {
        Self::new(CadenceSource::Fixed)
    }

    pub fn state(&self) -> Option<&'static str> {
        self.state
    }

    async fn current_state(
        &mut self,
        schedule: &Schedule,
        lookup: &LookupChain,
        now: DateTime<Utc>,
    ) -> Option<(&'static str, &'static str)> {
        match &self.source {
            CadenceSource::Fixed => None,
            CadenceSource::DayNight {
                location,
                ephemeris,
            } => {
                let fix = location.best().await.ok().flatten();
                let day = match fix {
                    Some(fix) => {
                        self.latch.clear();
                        solar_window_check(schedule, ephemeris.as_ref(), Position::from(&fix), now)
                    }
                    None => {
                        if self.latch.trip() {
                            warn!("no location fix, using night cadence");
                        }
                        false
                    }
                };
                Some(if day { ("day", "day.") } else { ("night", "night.") })
            }
            CadenceSource::Power { cache } => {
                let good = power_good(cache.as_ref(), lookup, &mut self.latch).await;
                Some(if good {
                    ("good", "power.good.")
                } else {
                    ("low", "power.low.")
                })
            }
        }
    }

    pub async fn select(
        &mut self,
        schedule: &Schedule,
        lookup: &LookupChain,
        now: DateTime<Utc>,
    ) -> Selection {
        let Some((state, prefix)) = self.current_state(schedule, lookup, now).await else {
            return Selection {
                cadence: schedule.cadence,
                changed: false,
            };
        };

        let previous = self.state.replace(state);
        let changed = previous.is_some_and(|p| p != state);
        if changed {
            info!(schedule = %schedule.name, state, "sample cadence changed");
        }
        Selection {
            cadence: prefixed_cadence(schedule.cadence, lookup, prefix),
            changed,
        }
    }
}
