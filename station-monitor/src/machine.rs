/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-instrument on/off control loop.
//!
//! Every tick the machine reloads schedules if their files changed, picks
//! the current schedule, evaluates the window, reads the device's power
//! state (a device that lost or gained power outside the machine moves it to
//! Off or On) and then acts on `(state, in_window)`:
//!
//! | State | In window | Action |
//! |---|---|---|
//! | Off | no | `when_off` hook |
//! | Off | yes | claim resources, `going_off_to_on`, then On (or back to Off and release on failure) |
//! | On | yes | `when_on` hook, sample when due |
//! | On | no | `going_on_to_off`, release resources, then Off |
//!
//! Device behaviour lives behind the [`Instrument`] trait.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use serde_yaml::Mapping;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use station_services::client::{CacheApi, ResourceApi};
use station_services::error::ClientError;

use crate::cadence::CadenceSelector;
use crate::claims::ResourceTracker;
use crate::latch::ReportLatch;
use crate::lockfile::LockError;
use crate::lookup::{builtin_defaults, LookupChain};
use crate::output::DataWriter;
use crate::pdu::PduError;
use crate::schedule::{SampleCadence, Schedule, ScheduleManager};
use crate::window::{PeriodicWindow, WindowPredicate};

pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentState {
    Startup,
    Off,
    TurningOn,
    On,
    TurningOff,
    Shutdown,
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("device error: {0}")]
    Device(String),

    #[error("command '{command}' failed: {status}")]
    Command { command: String, status: String },

    #[error("command '{command}' timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Pdu(#[from] PduError),

    #[error(transparent)]
    Rpc(#[from] ClientError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device needs a power cycle; the machine turns it off.
    #[error("device unhealthy: {0}")]
    DeviceUnhealthy(String),
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything an instrument hook may use.
pub struct InstrumentContext {
    pub name: String,
    pub claims: ResourceTracker,
    pub cache: Arc<dyn CacheApi>,
    /// Current schedule, if any matched this tick.
    pub schedule: Option<Arc<Schedule>>,
    /// Schedule options → instrument settings → built-in defaults.
    pub lookup: LookupChain,
    pub cancel: CancellationToken,
}

impl InstrumentContext {
    pub fn new(
        name: impl Into<String>,
        cache: Arc<dyn CacheApi>,
        arbiter: Arc<dyn ResourceApi>,
        cancel: CancellationToken,
    ) -> Self {
        let name = name.into();
        Self {
            claims: ResourceTracker::new(name.clone(), arbiter),
            name,
            cache,
            schedule: None,
            lookup: LookupChain::new().with_scope("defaults", builtin_defaults()),
            cancel,
        }
    }

    /// Returns whether the value was stored.
    pub async fn put_cache(&self, key: &str, value: Value) -> bool {
        match self.cache.put(key, value).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key, "cache put failed: {}", e);
                false
            }
        }
    }

    pub async fn get_cache(&self, key: &str) -> Option<Value> {
        match self.cache.get(key).await {
            Ok(value) => Some(value),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(key, "cache get failed: {}", e);
                None
            }
        }
    }

    pub async fn list_cache(&self) -> Vec<String> {
        self.cache.list().await.unwrap_or_else(|e| {
            warn!("cache list failed: {}", e);
            Vec::new()
        })
    }
}

// ── Instrument hooks ──────────────────────────────────────────────────────────

#[tonic::async_trait]
pub trait Instrument: Send {
    async fn startup(&mut self, _ctx: &mut InstrumentContext) -> Result<(), InstrumentError> {
        Ok(())
    }

    /// Observed power state, read at startup and on every tick.  `None`
    /// means the device cannot report it and the machine's own state stands.
    async fn is_on(&mut self, _ctx: &mut InstrumentContext) -> Result<Option<bool>, InstrumentError> {
        Ok(None)
    }

    async fn going_off_to_on(&mut self, _ctx: &mut InstrumentContext) -> Result<(), InstrumentError> {
        Ok(())
    }

    async fn when_on(&mut self, _ctx: &mut InstrumentContext) -> Result<(), InstrumentError> {
        Ok(())
    }

    /// Takes one sample.  Returned bytes go to the output files.
    async fn sample(&mut self, ctx: &mut InstrumentContext)
        -> Result<Option<Vec<u8>>, InstrumentError>;

    async fn going_on_to_off(&mut self, _ctx: &mut InstrumentContext) -> Result<(), InstrumentError> {
        Ok(())
    }

    async fn when_off(&mut self, _ctx: &mut InstrumentContext) -> Result<(), InstrumentError> {
        Ok(())
    }

    async fn shutdown(&mut self, _ctx: &mut InstrumentContext) -> Result<(), InstrumentError> {
        Ok(())
    }
}

// ── Machine ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MachineSettings {
    pub schedule_files: Vec<String>,
    pub tick: Duration,
    /// While this file exists the instrument is in window.
    pub window_flag: Option<PathBuf>,
    /// Consumed: a sample is taken and the file deleted.
    pub sample_flag: Option<PathBuf>,
    pub resources: Vec<String>,
    /// Instrument-level options, consulted after the schedule's own.
    pub options: Mapping,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            schedule_files: Vec::new(),
            tick: DEFAULT_TICK,
            window_flag: None,
            sample_flag: None,
            resources: Vec::new(),
            options: Mapping::new(),
        }
    }
}

pub struct InstrumentStateMachine {
    instrument: Box<dyn Instrument>,
    ctx: InstrumentContext,
    settings: MachineSettings,
    schedules: ScheduleManager,
    window: Box<dyn WindowPredicate>,
    cadence: CadenceSelector,
    writer: Option<DataWriter>,
    state: InstrumentState,
    next_sample: Option<DateTime<Utc>>,
    power_latch: ReportLatch,
}

fn remaining(until: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (until - now).to_std().unwrap_or(Duration::ZERO)
}

impl InstrumentStateMachine {
    pub fn new(
        instrument: Box<dyn Instrument>,
        ctx: InstrumentContext,
        settings: MachineSettings,
    ) -> Self {
        Self {
            instrument,
            ctx,
            settings,
            schedules: ScheduleManager::new(),
            window: Box::new(PeriodicWindow),
            cadence: CadenceSelector::fixed(),
            writer: None,
            state: InstrumentState::Startup,
            next_sample: None,
            power_latch: ReportLatch::new(),
        }
    }

    pub fn with_window(mut self, window: Box<dyn WindowPredicate>) -> Self {
        self.window = window;
        self
    }

    pub fn with_cadence(mut self, cadence: CadenceSelector) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn with_writer(mut self, writer: DataWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn state(&self) -> InstrumentState {
        self.state
    }

    pub fn next_sample(&self) -> Option<DateTime<Utc>> {
        self.next_sample
    }

    pub fn context(&self) -> &InstrumentContext {
        &self.ctx
    }

    fn set_state(&mut self, state: InstrumentState) {
        if self.state != state {
            info!(instrument = %self.ctx.name, from = ?self.state, to = ?state, "state change");
            self.state = state;
        }
    }

    fn lookup_for(&self, schedule: Option<&Arc<Schedule>>) -> LookupChain {
        let mut chain = LookupChain::new();
        if let Some(s) = schedule {
            chain = chain.with_scope(s.name.clone(), s.options().clone());
        }
        chain
            .with_scope("instrument", self.settings.options.clone())
            .with_scope("defaults", builtin_defaults())
    }

    fn window_forced(&self) -> bool {
        self.settings.window_flag.as_ref().is_some_and(|p| p.exists())
    }

    fn take_sample_flag(&self) -> bool {
        let Some(flag) = &self.settings.sample_flag else {
            return false;
        };
        if !flag.exists() {
            return false;
        }
        if let Err(e) = std::fs::remove_file(flag) {
            warn!(flag = %flag.display(), "cannot remove sample flag: {}", e);
        }
        true
    }

    /// Observes the device and resumes in On or Off.
    pub async fn startup(&mut self, now: DateTime<Utc>) -> Result<(), InstrumentError> {
        self.set_state(InstrumentState::Startup);
        self.schedules.reload(&self.settings.schedule_files);
        let schedule = self.schedules.match_at(now);
        self.ctx.lookup = self.lookup_for(schedule.as_ref());
        self.ctx.schedule = schedule;

        self.instrument.startup(&mut self.ctx).await?;

        let on = match self.instrument.is_on(&mut self.ctx).await {
            Ok(on) => on.unwrap_or(false),
            Err(e) => {
                warn!(instrument = %self.ctx.name, "cannot read power state, assuming off: {}", e);
                false
            }
        };
        if on {
            if let Err(e) = self.ctx.claims.set_resources(&self.settings.resources).await {
                warn!(instrument = %self.ctx.name, "cannot restore resource claim: {}", e);
            }
            self.set_state(InstrumentState::On);
        } else {
            self.set_state(InstrumentState::Off);
        }
        Ok(())
    }

    /// One scheduler pass.  Returns the state afterwards.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> InstrumentState {
        if self.schedules.reload(&self.settings.schedule_files) {
            self.next_sample = None;
        }
        let schedule = self.schedules.match_at(now);
        self.ctx.lookup = self.lookup_for(schedule.as_ref());
        self.ctx.schedule = schedule.clone();

        let scheduled = match &schedule {
            Some(s) if s.enabled => self.window.in_window(s, &self.ctx.lookup, now).await,
            _ => false,
        };
        let in_window = scheduled || self.window_forced();
        self.observe_power().await;
        debug!(
            instrument = %self.ctx.name,
            schedule = ?schedule.as_ref().map(|s| &s.name),
            in_window,
            "tick"
        );

        match (self.state, in_window) {
            (InstrumentState::Off, false) => {
                if let Err(e) = self.instrument.when_off(&mut self.ctx).await {
                    error!(instrument = %self.ctx.name, "when_off failed: {}", e);
                }
            }
            (InstrumentState::Off, true) => self.turn_on(now).await,
            (InstrumentState::On, true) => {
                if let Some(s) = schedule {
                    self.when_on(&s, now).await;
                }
            }
            (InstrumentState::On, false) => self.turn_off().await,
            _ => {}
        }
        self.state
    }

    /// Brings the stored state in line with the device when power changed
    /// behind the machine's back.
    async fn observe_power(&mut self) {
        let on = match self.instrument.is_on(&mut self.ctx).await {
            Ok(on) => {
                if self.power_latch.clear() {
                    info!(instrument = %self.ctx.name, "power state readable again");
                }
                on
            }
            Err(e) => {
                if self.power_latch.trip() {
                    warn!(
                        instrument = %self.ctx.name,
                        state = ?self.state,
                        "cannot read power state, keeping current state: {}",
                        e
                    );
                }
                None
            }
        };
        match (self.state, on) {
            (InstrumentState::On, Some(false)) => {
                warn!(instrument = %self.ctx.name, "device lost power");
                self.release().await;
                self.next_sample = None;
                self.set_state(InstrumentState::Off);
            }
            (InstrumentState::Off, Some(true)) => {
                info!(instrument = %self.ctx.name, "device powered externally");
                if let Err(e) = self.ctx.claims.set_resources(&self.settings.resources).await {
                    warn!(instrument = %self.ctx.name, "cannot restore resource claim: {}", e);
                }
                self.set_state(InstrumentState::On);
            }
            _ => {}
        }
    }

    async fn turn_on(&mut self, now: DateTime<Utc>) {
        self.set_state(InstrumentState::TurningOn);

        if let Err(e) = self.ctx.claims.set_resources(&self.settings.resources).await {
            error!(instrument = %self.ctx.name, "resource claim failed, staying off: {}", e);
            self.release().await;
            self.set_state(InstrumentState::Off);
            return;
        }

        match self.instrument.going_off_to_on(&mut self.ctx).await {
            Ok(()) => {
                self.set_state(InstrumentState::On);
                let cadence = match self.ctx.schedule.clone() {
                    Some(s) => self.cadence.select(&s, &self.ctx.lookup, now).await.cadence,
                    None => SampleCadence::default(),
                };
                let at_start = self.ctx.schedule.as_ref().is_some_and(|s| s.sample_at_start);
                self.next_sample = Some(if at_start { now } else { cadence.next_after(now) });
            }
            Err(e) => {
                error!(instrument = %self.ctx.name, "turn on failed: {}", e);
                self.release().await;
                self.set_state(InstrumentState::Off);
            }
        }
    }

    async fn turn_off(&mut self) {
        self.set_state(InstrumentState::TurningOff);
        if let Err(e) = self.instrument.going_on_to_off(&mut self.ctx).await {
            error!(instrument = %self.ctx.name, "turn off failed: {}", e);
        }
        self.release().await;
        self.next_sample = None;
        self.set_state(InstrumentState::Off);
    }

    async fn release(&mut self) {
        if let Err(e) = self.ctx.claims.clear_resources().await {
            warn!(instrument = %self.ctx.name, "resource release failed: {}", e);
        }
    }

    async fn when_on(&mut self, schedule: &Schedule, now: DateTime<Utc>) {
        if let Err(e) = self.instrument.when_on(&mut self.ctx).await {
            error!(instrument = %self.ctx.name, "when_on failed: {}", e);
        }

        let selection = self.cadence.select(schedule, &self.ctx.lookup, now).await;
        if selection.changed {
            self.next_sample = None;
        }
        let cadence = selection.cadence;

        if self.next_sample.is_none() {
            self.next_sample = Some(cadence.next_after(now));
        }
        if self.take_sample_flag() {
            info!(instrument = %self.ctx.name, "sample requested");
            self.next_sample = Some(now);
        }

        match self.next_sample {
            Some(due) if now >= due => {
                self.sample_once(now).await;
                if self.state == InstrumentState::On {
                    self.next_sample = Some(cadence.next_after(now));
                }
            }
            _ => {}
        }
        debug!(instrument = %self.ctx.name, next = ?self.next_sample, "next sample");
    }

    async fn sample_once(&mut self, now: DateTime<Utc>) {
        match self.instrument.sample(&mut self.ctx).await {
            Ok(Some(data)) => self.store(now, &data),
            Ok(None) => {}
            Err(InstrumentError::DeviceUnhealthy(reason)) => {
                warn!(instrument = %self.ctx.name, "device unhealthy, powering off: {}", reason);
                self.turn_off().await;
            }
            Err(e) => error!(instrument = %self.ctx.name, "sample failed: {}", e),
        }
    }

    fn store(&self, now: DateTime<Utc>, data: &[u8]) {
        let Some(writer) = &self.writer else {
            return;
        };
        if let Err(e) = writer.save(now, data) {
            error!(instrument = %self.ctx.name, "cannot save sample: {}", e);
            return;
        }
        if let Err(e) = writer.archive() {
            error!(instrument = %self.ctx.name, "cannot archive output: {}", e);
        }
    }

    /// Releases resources and runs the instrument's shutdown hook.  The
    /// device is left in whatever state it is in.
    pub async fn shutdown(&mut self) {
        self.set_state(InstrumentState::Shutdown);
        if let Err(e) = self.instrument.shutdown(&mut self.ctx).await {
            error!(instrument = %self.ctx.name, "shutdown failed: {}", e);
        }
        self.release().await;
    }

    /// Earliest of the next aligned scheduler tick and the next sample.
    pub fn next_wake(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tick = SampleCadence {
            rate: self.settings.tick,
            sync: true,
            offset: Duration::ZERO,
        }
        .next_after(now);
        match self.next_sample {
            Some(sample) if self.state == InstrumentState::On => tick.min(sample),
            _ => tick,
        }
    }

    /// Runs until the context's cancellation token fires.
    pub async fn run(mut self) {
        let cancel = self.ctx.cancel.clone();
        info!(instrument = %self.ctx.name, "starting");

        match self.startup(Utc::now()).await {
            Ok(()) => loop {
                self.tick(Utc::now()).await;
                let now = Utc::now();
                let wait = remaining(self.next_wake(now), now);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            },
            Err(e) => error!(instrument = %self.ctx.name, "startup failed: {}", e),
        }

        self.shutdown().await;
        info!(instrument = %self.ctx.name, "stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use chrono::TimeZone;
    use parking_lot::Mutex;
    use station_services::cache::LocalCache;
    use station_services::resources::ClaimRegistry;

    use crate::output::OutputConfig;

    #[derive(Default)]
    struct Probe {
        calls: Mutex<Vec<&'static str>>,
        powered: AtomicBool,
        fail_open: AtomicBool,
        unhealthy: AtomicBool,
    }

    impl Probe {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }

        fn count(&self, name: &str) -> usize {
            self.calls.lock().iter().filter(|c| **c == name).count()
        }
    }

    struct FakeInstrument(Arc<Probe>);

    impl FakeInstrument {
        fn record(&self, call: &'static str) {
            self.0.calls.lock().push(call);
        }
    }

    #[tonic::async_trait]
    impl Instrument for FakeInstrument {
        async fn is_on(&mut self, _: &mut InstrumentContext) -> Result<Option<bool>, InstrumentError> {
            Ok(Some(self.0.powered.load(Ordering::SeqCst)))
        }

        async fn going_off_to_on(&mut self, _: &mut InstrumentContext) -> Result<(), InstrumentError> {
            self.record("open");
            if self.0.fail_open.load(Ordering::SeqCst) {
                return Err(InstrumentError::Device("no response".into()));
            }
            self.0.powered.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn sample(
            &mut self,
            ctx: &mut InstrumentContext,
        ) -> Result<Option<Vec<u8>>, InstrumentError> {
            self.record("sample");
            if self.0.unhealthy.load(Ordering::SeqCst) {
                return Err(InstrumentError::DeviceUnhealthy("stuck".into()));
            }
            ctx.put_cache(&ctx.name, serde_json::json!({"ok": true})).await;
            Ok(Some(b"sample\n".to_vec()))
        }

        async fn going_on_to_off(&mut self, _: &mut InstrumentContext) -> Result<(), InstrumentError> {
            self.record("close");
            self.0.powered.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Arbiter that counts allocate calls.
    #[derive(Default)]
    struct CountingArbiter {
        registry: ClaimRegistry,
        calls: AtomicUsize,
    }

    #[tonic::async_trait]
    impl ResourceApi for CountingArbiter {
        async fn allocate(&self, instrument: &str, resources: Vec<String>) -> Result<(), ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.registry.allocate(instrument, resources);
            Ok(())
        }

        async fn list(&self) -> Result<BTreeMap<String, Vec<String>>, ClientError> {
            Ok(self.registry.snapshot())
        }
    }

    /// Window predicate controlled from the test.
    struct Switch(Arc<AtomicBool>);

    #[tonic::async_trait]
    impl WindowPredicate for Switch {
        async fn in_window(&mut self, _: &Schedule, _: &LookupChain, _: DateTime<Utc>) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        machine: InstrumentStateMachine,
        probe: Arc<Probe>,
        arbiter: Arc<CountingArbiter>,
        cache: LocalCache,
        window: Arc<AtomicBool>,
        dir: tempfile::TempDir,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap()
    }

    fn harness(schedules: &str) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("schedules.yaml"), schedules).unwrap();

        let probe = Arc::new(Probe::default());
        let arbiter = Arc::new(CountingArbiter::default());
        let cache = LocalCache::new();
        let window = Arc::new(AtomicBool::new(false));

        let ctx = InstrumentContext::new(
            "camera",
            Arc::new(cache.clone()),
            arbiter.clone(),
            CancellationToken::new(),
        );
        let settings = MachineSettings {
            schedule_files: vec![format!("{}/*.yaml", dir.path().display())],
            sample_flag: Some(dir.path().join("sample.flag")),
            window_flag: Some(dir.path().join("window.flag")),
            resources: vec!["camera=on".into()],
            ..MachineSettings::default()
        };
        let machine =
            InstrumentStateMachine::new(Box::new(FakeInstrument(probe.clone())), ctx, settings)
                .with_window(Box::new(Switch(window.clone())));
        Harness {
            machine,
            probe,
            arbiter,
            cache,
            window,
            dir,
        }
    }

    fn claims(h: &Harness) -> Option<Vec<String>> {
        h.arbiter.registry.snapshot().get("camera").cloned()
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "").unwrap();
    }

    #[tokio::test]
    async fn off_with_active_window_turns_on_with_one_claim() {
        let mut h = harness("always: {}\n");
        h.machine.startup(now()).await.unwrap();
        assert_eq!(h.machine.state(), InstrumentState::Off);

        h.window.store(true, Ordering::SeqCst);
        assert_eq!(h.machine.tick(now()).await, InstrumentState::On);
        assert_eq!(h.arbiter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(claims(&h), Some(vec!["camera=on".to_string()]));
        assert_eq!(h.probe.calls(), vec!["open"]);
    }

    #[tokio::test]
    async fn resumes_on_and_turns_off_when_window_closes() {
        let mut h = harness("always: {}\n");
        h.probe.powered.store(true, Ordering::SeqCst);
        h.machine.startup(now()).await.unwrap();
        assert_eq!(h.machine.state(), InstrumentState::On);
        assert!(claims(&h).is_some());

        assert_eq!(h.machine.tick(now()).await, InstrumentState::Off);
        assert_eq!(h.probe.calls(), vec!["close"]);
        assert_eq!(claims(&h), None);
    }

    #[tokio::test]
    async fn failed_open_releases_claim() {
        let mut h = harness("always: {}\n");
        h.probe.fail_open.store(true, Ordering::SeqCst);
        h.machine.startup(now()).await.unwrap();
        h.window.store(true, Ordering::SeqCst);

        assert_eq!(h.machine.tick(now()).await, InstrumentState::Off);
        assert_eq!(claims(&h), None);
    }

    #[tokio::test]
    async fn samples_at_start_and_writes_output() {
        let mut h = harness("always:\n  sample.atstart: true\n  sample.rate: 10m\n");
        let out = h.dir.path().join("out");
        let writer = DataWriter::new(OutputConfig {
            staging: out.clone(),
            path: out.clone(),
            compress: false,
            ..OutputConfig::default()
        })
        .unwrap();
        h.machine = h.machine.with_writer(writer);

        h.machine.startup(now()).await.unwrap();
        h.window.store(true, Ordering::SeqCst);
        h.machine.tick(now()).await;
        assert_eq!(h.machine.next_sample(), Some(now()));

        h.machine.tick(now()).await;
        assert_eq!(h.probe.count("sample"), 1);
        assert_eq!(
            h.machine.next_sample(),
            Some(now() + chrono::Duration::minutes(10))
        );
        assert!(h.cache.get("camera").await.is_ok());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn first_sample_slot_after_turn_on_is_taken() {
        let mut h = harness("always:\n  sample.rate: 60\n");
        let on_at = now() + chrono::Duration::seconds(30);
        let slot = now() + chrono::Duration::minutes(1);
        h.machine.startup(on_at).await.unwrap();
        h.window.store(true, Ordering::SeqCst);

        assert_eq!(h.machine.tick(on_at).await, InstrumentState::On);
        assert_eq!(h.machine.next_sample(), Some(slot));
        assert_eq!(h.machine.next_wake(on_at), slot);

        h.machine.tick(slot).await;
        assert_eq!(h.probe.count("sample"), 1);
        assert_eq!(h.machine.next_sample(), Some(slot + chrono::Duration::minutes(1)));
    }

    #[tokio::test]
    async fn lost_power_is_noticed_and_device_reopened() {
        let mut h = harness("always: {}\n");
        h.machine.startup(now()).await.unwrap();
        h.window.store(true, Ordering::SeqCst);
        assert_eq!(h.machine.tick(now()).await, InstrumentState::On);

        h.probe.powered.store(false, Ordering::SeqCst);
        assert_eq!(h.machine.tick(now()).await, InstrumentState::On);
        assert_eq!(h.probe.count("open"), 2);
        assert!(h.probe.powered.load(Ordering::SeqCst));
        assert_eq!(claims(&h), Some(vec!["camera=on".to_string()]));
    }

    #[tokio::test]
    async fn externally_powered_device_is_turned_off_out_of_window() {
        let mut h = harness("always: {}\n");
        h.machine.startup(now()).await.unwrap();
        assert_eq!(h.machine.state(), InstrumentState::Off);

        h.probe.powered.store(true, Ordering::SeqCst);
        assert_eq!(h.machine.tick(now()).await, InstrumentState::Off);
        assert_eq!(h.probe.calls(), vec!["close"]);
        assert_eq!(claims(&h), None);
    }

    #[tokio::test]
    async fn sample_flag_forces_a_sample_and_is_consumed() {
        let mut h = harness("always:\n  sample.rate: 1h\n");
        h.machine.startup(now()).await.unwrap();
        h.window.store(true, Ordering::SeqCst);
        h.machine.tick(now()).await;
        h.machine.tick(now()).await;
        assert_eq!(h.probe.count("sample"), 0);

        touch(h.dir.path(), "sample.flag");
        h.machine.tick(now()).await;
        assert_eq!(h.probe.count("sample"), 1);
        assert!(!h.dir.path().join("sample.flag").exists());
    }

    #[tokio::test]
    async fn window_flag_overrides_schedule() {
        let mut h = harness("nothing:\n  enabled: false\n");
        h.machine.startup(now()).await.unwrap();
        h.window.store(true, Ordering::SeqCst);
        assert_eq!(h.machine.tick(now()).await, InstrumentState::Off);

        touch(h.dir.path(), "window.flag");
        assert_eq!(h.machine.tick(now()).await, InstrumentState::On);
    }

    #[tokio::test]
    async fn unhealthy_sample_powers_off() {
        let mut h = harness("always:\n  sample.atstart: true\n");
        h.machine.startup(now()).await.unwrap();
        h.window.store(true, Ordering::SeqCst);
        h.machine.tick(now()).await;

        h.probe.unhealthy.store(true, Ordering::SeqCst);
        assert_eq!(h.machine.tick(now()).await, InstrumentState::Off);
        assert_eq!(h.probe.calls(), vec!["open", "sample", "close"]);
        assert_eq!(claims(&h), None);
        assert_eq!(h.machine.next_sample(), None);
    }

    #[tokio::test]
    async fn no_matching_schedule_is_out_of_window() {
        let mut h = harness("june:\n  time.start: 06-01\n  time.stop: 06-02\n");
        h.machine.startup(now()).await.unwrap();
        h.window.store(true, Ordering::SeqCst);
        assert_eq!(h.machine.tick(now()).await, InstrumentState::Off);
    }

    #[tokio::test]
    async fn next_wake_prefers_earlier_sample() {
        let mut h = harness("always:\n  sample.atstart: true\n");
        h.machine.startup(now()).await.unwrap();
        assert_eq!(h.machine.next_wake(now()), now() + chrono::Duration::minutes(1));

        h.window.store(true, Ordering::SeqCst);
        h.machine.tick(now()).await;
        assert_eq!(h.machine.next_wake(now()), now());
    }

    #[tokio::test]
    async fn run_stops_on_cancel_and_releases() {
        let h = harness("always: {}\n");
        h.window.store(true, Ordering::SeqCst);
        let cancel = h.machine.context().cancel.clone();
        let arbiter = h.arbiter.clone();
        let task = tokio::spawn(h.machine.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(arbiter.registry.snapshot().contains_key("camera"));
        cancel.cancel();
        task.await.unwrap();
        assert!(!arbiter.registry.snapshot().contains_key("camera"));
    }
}
