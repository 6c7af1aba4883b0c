/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Declarative operating windows.
//!
//! Schedule files are YAML mappings of schedule name → fields:
//!
//! ```yaml
//! summer:
//!   priority: 20
//!   time.start: 05-01
//!   time.stop: 09-01
//!   solarangle.min: -12
//!   window.max: 8h
//!   sample.rate: 2m
//! default:
//!   sample.rate: 10m
//! ```
//!
//! [`ScheduleManager`] watches a set of glob patterns, reparses every file
//! whenever the matched set or any modification time changes, and answers
//! "which schedule is current at `t`" by descending priority.

pub mod calendar;
pub mod error;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde_yaml::{Mapping, Value};
use tracing::{debug, error, info, warn};

use crate::lookup::{LookupChain, LookupError};
use calendar::{add_year, year_of, TimeOfYear};
pub use error::ScheduleError;

// ── Sample cadence ────────────────────────────────────────────────────────────

/// How often an instrument samples while on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleCadence {
    pub rate: Duration,
    /// Align samples to multiples of `rate` (plus `offset`) on the wall clock.
    pub sync: bool,
    pub offset: Duration,
}

impl Default for SampleCadence {
    fn default() -> Self {
        Self {
            rate: Duration::from_secs(60),
            sync: true,
            offset: Duration::ZERO,
        }
    }
}

impl SampleCadence {
    /// The first sample time strictly after `now` (or exactly `rate` after
    /// it when not synchronised).
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let rate = self.rate.as_secs_f64();
        let wait = if self.sync && rate > 0.0 {
            let shifted = now.timestamp_millis() as f64 / 1000.0 - self.offset.as_secs_f64();
            rate - shifted.rem_euclid(rate)
        } else {
            rate
        };
        now + chrono::Duration::milliseconds((wait * 1000.0).round() as i64)
    }
}

/// Wall-clock sub-window: on for `span` at the start of every `rate`
/// period, shifted by `offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallClockWindow {
    pub rate: Duration,
    pub offset: Duration,
    pub span: Duration,
}

impl WallClockWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let rate = self.rate.as_secs_f64();
        if rate <= 0.0 {
            return true;
        }
        let now = now.timestamp_millis() as f64 / 1000.0;
        let start = (now / rate).floor() * rate + self.offset.as_secs_f64();
        let stop = start + self.span.as_secs_f64();
        now >= start && now < stop
    }
}

// ── Schedule ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Schedule {
    pub name: String,
    pub enabled: bool,
    /// Higher wins.
    pub priority: i64,
    pub start: Option<TimeOfYear>,
    pub stop: Option<TimeOfYear>,
    /// Length of the schedule when `start` is set and `stop` is not.
    pub span: Option<Duration>,
    pub min_solar_angle: Option<f64>,
    pub max_solar_angle: Option<f64>,
    /// Only transits whose day-of-year is a multiple of this count.
    pub repeat_days: Option<u32>,
    pub window_min: Duration,
    pub window_max: Option<Duration>,
    pub periodic: Option<WallClockWindow>,
    pub cadence: SampleCadence,
    pub sample_at_start: bool,
    /// Lead time before sunset for night instruments.
    pub start_offset: Option<Duration>,
    options: Mapping,
}

fn field<T>(schedule: &str, result: Result<T, LookupError>) -> Result<T, ScheduleError> {
    result.map_err(|source| ScheduleError::Field {
        schedule: schedule.to_string(),
        source,
    })
}

fn time_field(
    schedule: &str,
    chain: &LookupChain,
    key: &'static str,
) -> Result<Option<TimeOfYear>, ScheduleError> {
    let text: Option<String> = field(schedule, chain.get(key))?;
    text.map(|t| {
        TimeOfYear::parse(&t).ok_or_else(|| ScheduleError::Invalid {
            schedule: schedule.to_string(),
            field: key,
            reason: format!("'{}' is not MM-DD[ HH:MM[:SS]] or YYYY-MM-DD[ HH:MM[:SS]]", t),
        })
    })
    .transpose()
}

impl Schedule {
    /// Builds a schedule from its field mapping.  Unknown keys are kept as
    /// schedule-scoped options.
    pub fn from_options(name: &str, options: Mapping) -> Result<Self, ScheduleError> {
        let chain = LookupChain::new().with_scope(name, options.clone());

        // An explicit null disables the default lower bound.
        let min_solar_angle = match chain.raw("solarangle.min") {
            None => Some(-6.0),
            Some(_) => field(name, chain.get("solarangle.min"))?,
        };

        let rate = field(name, chain.duration_or("sample.rate", Duration::from_secs(60)))?;
        if rate.is_zero() {
            return Err(ScheduleError::Invalid {
                schedule: name.to_string(),
                field: "sample.rate",
                reason: "must be greater than zero".into(),
            });
        }

        let periodic = field(name, chain.duration("window.rate"))?
            .filter(|r| !r.is_zero())
            .map(|rate| -> Result<WallClockWindow, ScheduleError> {
                Ok(WallClockWindow {
                    rate,
                    offset: field(name, chain.duration_or("window.offset", Duration::ZERO))?,
                    span: field(name, chain.duration_or("window.span", Duration::from_secs(60)))?,
                })
            })
            .transpose()?;

        Ok(Self {
            name: name.to_string(),
            enabled: field(name, chain.get_or("enabled", true))?,
            priority: field(name, chain.get_or("priority", 10))?,
            start: time_field(name, &chain, "time.start")?,
            stop: time_field(name, &chain, "time.stop")?,
            span: field(name, chain.duration("time.span"))?,
            min_solar_angle,
            max_solar_angle: field(name, chain.get("solarangle.max"))?,
            repeat_days: field(name, chain.get::<u32>("repeat.days"))?.filter(|d| *d > 0),
            window_min: field(name, chain.duration_or("window.min", Duration::ZERO))?,
            window_max: field(name, chain.duration("window.max"))?,
            periodic,
            cadence: SampleCadence {
                rate,
                sync: field(name, chain.get_or("sample.sync", true))?,
                offset: field(name, chain.duration_or("sample.offset", Duration::ZERO))?,
            },
            sample_at_start: field(name, chain.get_or("sample.atstart", false))?,
            start_offset: field(name, chain.duration("start.offset"))?,
            options,
        })
    }

    /// Every field of this schedule as written in its file.
    pub fn options(&self) -> &Mapping {
        &self.options
    }

    fn bounds(&self, year: i32) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let start = self.start.and_then(|s| s.in_year(year));
        let mut stop = self.stop.and_then(|s| s.in_year(year));
        if let (Some(start), None, Some(span)) = (start, stop, self.span) {
            stop = chrono::Duration::from_std(span).ok().map(|d| start + d);
        }
        if let (Some(start), Some(s)) = (start, stop) {
            if s < start {
                stop = add_year(s);
            }
        }
        (start, stop)
    }

    /// Whether `at` lies within `[start, stop)`.  A window that wraps past
    /// the end of the year and began the previous year also matches.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let within = |(start, stop): (Option<DateTime<Utc>>, Option<DateTime<Utc>>)| {
            start.map_or(true, |s| at >= s) && stop.map_or(true, |s| at < s)
        };
        let year = year_of(at);
        if within(self.bounds(year)) {
            return true;
        }
        let annual = self.start.is_some_and(|s| s.is_annual());
        annual && within(self.bounds(year - 1))
    }

    /// The wall-clock sub-window; always in when none is configured.
    pub fn in_periodic_window(&self, at: DateTime<Utc>) -> bool {
        self.periodic.map_or(true, |p| p.contains(at))
    }
}

// ── ScheduleManager ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ScheduleManager {
    file_times: HashMap<PathBuf, SystemTime>,
    /// Sorted by descending priority, load order within a priority.
    schedules: Vec<Arc<Schedule>>,
}

fn expand(patterns: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for pattern in patterns {
        match glob::glob(pattern) {
            Ok(paths) => files.extend(paths.filter_map(Result::ok)),
            Err(source) => error!(
                "{}",
                ScheduleError::Pattern {
                    pattern: pattern.clone(),
                    source
                }
            ),
        }
    }
    files.sort();
    files.dedup();
    files
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Parses one schedule file into `(name, fields)` pairs in file order.
pub fn read_schedule_file(path: &Path) -> Result<Vec<(String, Mapping)>, ScheduleError> {
    let content = std::fs::read_to_string(path).map_err(|source| ScheduleError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc: Value = serde_yaml::from_str(&content).map_err(|source| ScheduleError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let layout = || ScheduleError::Layout {
        path: path.to_path_buf(),
    };
    let top = match doc {
        Value::Null => return Ok(Vec::new()),
        Value::Mapping(top) => top,
        _ => return Err(layout()),
    };
    top.into_iter()
        .map(|(name, fields)| {
            let name = name.as_str().map(str::to_string).ok_or_else(layout)?;
            let fields = match fields {
                Value::Null => Mapping::new(),
                Value::Mapping(m) => m,
                _ => return Err(layout()),
            };
            Ok((name, fields))
        })
        .collect()
}

impl ScheduleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-expands `patterns` and reloads every schedule if the matched file
    /// set or any modification time changed.  Returns whether it reloaded.
    pub fn reload(&mut self, patterns: &[String]) -> bool {
        let files = expand(patterns);
        let current: HashMap<PathBuf, SystemTime> = files
            .iter()
            .filter_map(|path| modified(path).map(|t| (path.clone(), t)))
            .collect();

        if current == self.file_times {
            return false;
        }
        self.file_times = current;
        self.load(&files);
        true
    }

    /// Replaces the schedule list with the contents of `files`.
    pub fn load(&mut self, files: &[PathBuf]) {
        info!(files = files.len(), "loading schedules");

        let mut loaded: Vec<Schedule> = Vec::new();
        for path in files {
            let entries = match read_schedule_file(path) {
                Ok(entries) => entries,
                Err(e) => {
                    error!("{}", e);
                    continue;
                }
            };
            for (name, options) in entries {
                let schedule = match Schedule::from_options(&name, options) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(file = %path.display(), "{}", e);
                        continue;
                    }
                };
                match loaded.iter_mut().find(|s| s.name == schedule.name) {
                    Some(existing) => {
                        warn!(schedule = %name, file = %path.display(), "schedule redefined");
                        *existing = schedule;
                    }
                    None => loaded.push(schedule),
                }
            }
        }

        // Stable: equal priorities keep load order.
        loaded.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.schedules = loaded.into_iter().map(Arc::new).collect();

        for schedule in &self.schedules {
            info!("  - [{}] {}", schedule.priority, schedule.name);
        }
    }

    pub fn schedules(&self) -> &[Arc<Schedule>] {
        &self.schedules
    }

    /// The highest-priority schedule whose bounds contain `at`.
    pub fn match_at(&self, at: DateTime<Utc>) -> Option<Arc<Schedule>> {
        let found = self.schedules.iter().find(|s| s.matches(at)).cloned();
        debug!(at = %at, schedule = ?found.as_ref().map(|s| &s.name), "schedule match");
        found
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn schedule(yaml: &str) -> Schedule {
        Schedule::from_options("test", serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn pattern(dir: &Path) -> Vec<String> {
        vec![format!("{}/*.yaml", dir.display())]
    }

    // ── Schedule fields ───────────────────────────────────────────────────────

    #[test]
    fn empty_schedule_takes_defaults() {
        let s = schedule("{}");
        assert!(s.enabled);
        assert_eq!(s.priority, 10);
        assert_eq!(s.min_solar_angle, Some(-6.0));
        assert_eq!(s.max_solar_angle, None);
        assert_eq!(s.window_min, Duration::ZERO);
        assert_eq!(s.window_max, None);
        assert!(s.periodic.is_none());
        assert_eq!(s.cadence, SampleCadence::default());
        assert!(!s.sample_at_start);
    }

    #[test]
    fn null_min_solar_angle_disables_bound() {
        assert_eq!(schedule("solarangle.min: null").min_solar_angle, None);
    }

    #[test]
    fn nested_and_dotted_fields_are_equivalent() {
        let a = schedule("sample.rate: 5m\nwindow.max: 2h");
        let b = schedule("sample:\n  rate: 300\nwindow:\n  max: 7200");
        assert_eq!(a.cadence.rate, b.cadence.rate);
        assert_eq!(a.window_max, b.window_max);
    }

    #[test]
    fn invalid_start_time_is_rejected() {
        let err = Schedule::from_options("bad", serde_yaml::from_str("time.start: soon").unwrap())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Invalid { field: "time.start", .. }));
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        assert!(Schedule::from_options("z", serde_yaml::from_str("sample.rate: 0").unwrap()).is_err());
    }

    // ── Matching ──────────────────────────────────────────────────────────────

    #[test]
    fn start_stop_bounds_are_half_open() {
        let s = schedule("time.start: 05-01\ntime.stop: 09-01");
        assert!(!s.matches(utc(2025, 4, 30, 23)));
        assert!(s.matches(utc(2025, 5, 1, 0)));
        assert!(s.matches(utc(2025, 8, 31, 23)));
        assert!(!s.matches(utc(2025, 9, 1, 0)));
    }

    #[test]
    fn stop_before_start_wraps_into_next_year() {
        let s = schedule("time.start: 11-01\ntime.stop: 02-01");
        assert!(s.matches(utc(2025, 12, 15, 0)));
        assert!(s.matches(utc(2026, 1, 15, 0)));
        assert!(!s.matches(utc(2026, 2, 2, 0)));
        assert!(!s.matches(utc(2025, 10, 31, 0)));
    }

    #[test]
    fn span_sets_stop_when_absent() {
        let s = schedule("time.start: 06-01 12:00\ntime.span: 2h");
        assert!(s.matches(utc(2025, 6, 1, 13)));
        assert!(!s.matches(utc(2025, 6, 1, 14)));
    }

    #[test]
    fn periodic_window_uses_wall_clock() {
        let s = schedule("window.rate: 1h\nwindow.offset: 10m\nwindow.span: 5m");
        let base = utc(2025, 1, 1, 3);
        assert!(!s.in_periodic_window(base + chrono::Duration::minutes(5)));
        assert!(s.in_periodic_window(base + chrono::Duration::minutes(10)));
        assert!(s.in_periodic_window(base + chrono::Duration::minutes(14)));
        assert!(!s.in_periodic_window(base + chrono::Duration::minutes(15)));
        assert!(schedule("{}").in_periodic_window(base));
    }

    #[test]
    fn synced_cadence_aligns_to_rate() {
        let cadence = SampleCadence {
            rate: Duration::from_secs(600),
            sync: true,
            offset: Duration::from_secs(60),
        };
        let now = utc(2025, 1, 1, 3) + chrono::Duration::minutes(2);
        assert_eq!(cadence.next_after(now), utc(2025, 1, 1, 3) + chrono::Duration::minutes(11));

        let free = SampleCadence { sync: false, ..cadence };
        assert_eq!(free.next_after(now), now + chrono::Duration::minutes(10));
    }

    // ── ScheduleManager ───────────────────────────────────────────────────────

    #[test]
    fn higher_priority_wins_in_overlap() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.yaml",
            "low:\n  priority: 5\nhigh:\n  priority: 50\n  time.start: 06-01\n  time.stop: 07-01\n",
        );
        let mut manager = ScheduleManager::new();
        assert!(manager.reload(&pattern(dir.path())));

        assert_eq!(manager.match_at(utc(2025, 6, 15, 0)).unwrap().name, "high");
        assert_eq!(manager.match_at(utc(2025, 8, 15, 0)).unwrap().name, "low");
    }

    #[test]
    fn equal_priority_keeps_load_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "first: {}\n");
        write(dir.path(), "b.yaml", "second: {}\n");
        let mut manager = ScheduleManager::new();
        manager.reload(&pattern(dir.path()));
        assert_eq!(manager.match_at(utc(2025, 1, 1, 0)).unwrap().name, "first");
    }

    #[test]
    fn reload_is_noop_when_nothing_changed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "only: {}\n");
        let mut manager = ScheduleManager::new();
        assert!(manager.reload(&pattern(dir.path())));
        let before = Arc::clone(&manager.schedules()[0]);

        assert!(!manager.reload(&pattern(dir.path())));
        assert!(Arc::ptr_eq(&before, &manager.schedules()[0]));
    }

    #[test]
    fn reload_detects_new_and_removed_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "one: {}\n");
        let mut manager = ScheduleManager::new();
        manager.reload(&pattern(dir.path()));

        let extra = write(dir.path(), "b.yaml", "two: {}\n");
        assert!(manager.reload(&pattern(dir.path())));
        assert_eq!(manager.schedules().len(), 2);

        std::fs::remove_file(extra).unwrap();
        assert!(manager.reload(&pattern(dir.path())));
        assert_eq!(manager.schedules().len(), 1);
    }

    #[test]
    fn broken_file_does_not_abort_reload() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "good: {}\n");
        write(dir.path(), "b.yaml", "this: [is: not yaml\n");
        write(dir.path(), "c.yaml", "bad:\n  time.start: never\nfine:\n  priority: 3\n");
        let mut manager = ScheduleManager::new();
        manager.reload(&pattern(dir.path()));

        let names: Vec<&str> = manager.schedules().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["good", "fine"]);
    }

    #[test]
    fn later_definition_replaces_earlier() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "camera:\n  priority: 1\n");
        write(dir.path(), "b.yaml", "camera:\n  priority: 99\n");
        let mut manager = ScheduleManager::new();
        manager.reload(&pattern(dir.path()));
        assert_eq!(manager.schedules().len(), 1);
        assert_eq!(manager.schedules()[0].priority, 99);
    }

    #[test]
    fn no_schedule_matches_outside_bounds() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "june:\n  time.start: 06-01\n  time.stop: 07-01\n");
        let mut manager = ScheduleManager::new();
        manager.reload(&pattern(dir.path()));
        assert!(manager.match_at(utc(2025, 1, 1, 0)).is_none());
    }
}
