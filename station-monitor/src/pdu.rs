/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Power distribution unit control.
//!
//! A PDU drives several rails.  Powering up walks every rail through its
//! stages in lock step, one tick per second; a stage's command is sent once
//! when the stage is entered.  Powering down sends each rail's stop state.
//!
//! ```yaml
//! pdu:
//!   unit: pdu1
//!   program: pductl
//!   rails:
//!     - name: camera
//!       device: cam0
//!       stop_state: off
//!       stages:
//!         - {state: on, duration: 5}
//!         - {name: warmup, state: keep, duration: 60}
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::duration;
use crate::machine::{Instrument, InstrumentContext, InstrumentError};

/// Stage state that sends no command.
pub const KEEP: &str = "keep";

const STAGE_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum PduError {
    #[error("'{command}' did not succeed after {attempts} attempts")]
    Timeout { command: String, attempts: u32 },

    #[error("'{command}' produced unusable output: {reason}")]
    Command { command: String, reason: String },

    #[error("cannot run '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("power sequencing cancelled")]
    Cancelled,
}

// ── Rails and stages ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Stage {
    #[serde(default)]
    pub name: Option<String>,
    pub state: String,
    #[serde(deserialize_with = "duration::required")]
    pub duration: Duration,
}

impl Stage {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.state)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_stop_state() -> String {
    "off".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rail {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_stop_state")]
    pub stop_state: String,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl Rail {
    /// A rail with nothing attached is never switched.
    pub fn is_enabled(&self) -> bool {
        self.enabled && (self.device.is_some() || self.label.is_some())
    }
}

struct Sequence {
    rail: String,
    entered: Option<String>,
    stages: VecDeque<(Stage, Duration)>,
}

/// Lock-step stage walker for power-up.
pub struct StageSequencer {
    rails: Vec<Sequence>,
}

impl StageSequencer {
    /// Enabled rails with at least one stage.
    pub fn new(rails: &[Rail]) -> Self {
        let rails = rails
            .iter()
            .filter(|r| r.is_enabled() && !r.stages.is_empty())
            .map(|r| Sequence {
                rail: r.name.clone(),
                entered: None,
                stages: r.stages.iter().map(|s| (s.clone(), s.duration)).collect(),
            })
            .collect();
        Self { rails }
    }

    pub fn is_done(&self) -> bool {
        self.rails.is_empty()
    }

    /// Advances one tick and returns the `(rail, state)` commands to send.
    pub fn advance(&mut self) -> Vec<(String, String)> {
        let mut commands = Vec::new();
        for seq in &mut self.rails {
            let Some((stage, left)) = seq.stages.front_mut() else {
                continue;
            };
            if seq.entered.as_deref() != Some(stage.name()) {
                info!(rail = %seq.rail, stage = stage.name(), "entering stage");
                seq.entered = Some(stage.name().to_string());
                if stage.state != KEEP {
                    commands.push((seq.rail.clone(), stage.state.clone()));
                }
            }
            *left = left.saturating_sub(STAGE_TICK);
            if left.is_zero() {
                seq.stages.pop_front();
            }
        }
        self.rails.retain(|seq| !seq.stages.is_empty());
        commands
    }
}

// ── Switch ────────────────────────────────────────────────────────────────────

#[tonic::async_trait]
pub trait PowerSwitch: Send + Sync {
    async fn set_rail(&self, rail: &str, state: &str) -> Result<(), PduError>;
    /// Unit status; `{"rails": {name: state}}` at least.
    async fn status(&self) -> Result<Value, PduError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max: 3,
            wait: Duration::from_secs(2),
        }
    }
}

/// Switch driven by an external control program:
/// `<program> <unit> SP <rail> <state>` and `<program> <unit> status`.
#[derive(Debug, Clone)]
pub struct CommandSwitch {
    program: String,
    unit: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl CommandSwitch {
    pub fn new(
        program: impl Into<String>,
        unit: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            program: program.into(),
            unit: unit.into(),
            timeout,
            retry,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, PduError> {
        let command = format!("{} {} {}", self.program, self.unit, args.join(" "));
        let attempts = self.retry.max + 1;
        for attempt in 1..=attempts {
            let child = Command::new(&self.program)
                .arg(&self.unit)
                .args(args)
                .kill_on_drop(true)
                .output();
            match tokio::time::timeout(self.timeout, child).await {
                Ok(Ok(out)) if out.status.success() => {
                    debug!(command = %command, attempt, "pdu command ok");
                    return Ok(String::from_utf8_lossy(&out.stdout).into_owned());
                }
                Ok(Ok(out)) => {
                    warn!(command = %command, attempt, status = %out.status, "pdu command failed")
                }
                Ok(Err(source)) => return Err(PduError::Io { command, source }),
                Err(_) => warn!(command = %command, attempt, "pdu command timed out"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry.wait).await;
            }
        }
        Err(PduError::Timeout { command, attempts })
    }
}

#[tonic::async_trait]
impl PowerSwitch for CommandSwitch {
    async fn set_rail(&self, rail: &str, state: &str) -> Result<(), PduError> {
        self.run(&["SP", rail, state]).await.map(|_| ())
    }

    async fn status(&self) -> Result<Value, PduError> {
        let out = self.run(&["status"]).await?;
        serde_json::from_str(&out).map_err(|e| PduError::Command {
            command: format!("{} {} status", self.program, self.unit),
            reason: e.to_string(),
        })
    }
}

// ── Sequencing ────────────────────────────────────────────────────────────────

pub async fn power_up(
    switch: &dyn PowerSwitch,
    rails: &[Rail],
    cancel: &CancellationToken,
) -> Result<(), PduError> {
    let mut sequencer = StageSequencer::new(rails);
    loop {
        for (rail, state) in sequencer.advance() {
            switch.set_rail(&rail, &state).await?;
        }
        if sequencer.is_done() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(PduError::Cancelled),
            _ = tokio::time::sleep(STAGE_TICK) => {}
        }
    }
}

/// Sends every enabled rail its stop state.  All rails are attempted; the
/// first failure is returned.
pub async fn power_down(switch: &dyn PowerSwitch, rails: &[Rail]) -> Result<(), PduError> {
    let mut first_error = None;
    for rail in rails.iter().filter(|r| r.is_enabled() && r.stop_state != KEEP) {
        info!(rail = %rail.name, state = %rail.stop_state, "stopping rail");
        if let Err(e) = switch.set_rail(&rail.name, &rail.stop_state).await {
            warn!(rail = %rail.name, "{}", e);
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// On when any enabled rail reports a state other than its stop state.
pub fn rails_on(status: &Value, rails: &[Rail]) -> bool {
    let Some(reported) = status.get("rails").and_then(Value::as_object) else {
        return false;
    };
    rails.iter().filter(|r| r.is_enabled()).any(|rail| {
        reported
            .get(&rail.name)
            .and_then(Value::as_str)
            .is_some_and(|state| !state.eq_ignore_ascii_case(&rail.stop_state))
    })
}

// ── Instrument ────────────────────────────────────────────────────────────────

pub struct PduInstrument {
    unit: String,
    rails: Vec<Rail>,
    switch: Arc<dyn PowerSwitch>,
    /// When false, power transitions are no-ops and the PDU is only read.
    control: bool,
}

impl PduInstrument {
    pub fn new(
        unit: impl Into<String>,
        rails: Vec<Rail>,
        switch: Arc<dyn PowerSwitch>,
        control: bool,
    ) -> Self {
        Self {
            unit: unit.into(),
            rails,
            switch,
            control,
        }
    }
}

#[tonic::async_trait]
impl Instrument for PduInstrument {
    async fn is_on(&mut self, _ctx: &mut InstrumentContext) -> Result<Option<bool>, InstrumentError> {
        let status = self.switch.status().await?;
        Ok(Some(rails_on(&status, &self.rails)))
    }

    async fn going_off_to_on(&mut self, ctx: &mut InstrumentContext) -> Result<(), InstrumentError> {
        if !self.control {
            return Ok(());
        }
        power_up(self.switch.as_ref(), &self.rails, &ctx.cancel).await?;
        Ok(())
    }

    async fn sample(&mut self, ctx: &mut InstrumentContext) -> Result<Option<Vec<u8>>, InstrumentError> {
        let status = self.switch.status().await?;
        ctx.put_cache(&self.unit, status.clone()).await;
        let mut line = status.to_string().into_bytes();
        line.push(b'\n');
        Ok(Some(line))
    }

    async fn going_on_to_off(&mut self, _ctx: &mut InstrumentContext) -> Result<(), InstrumentError> {
        if !self.control {
            return Ok(());
        }
        power_down(self.switch.as_ref(), &self.rails).await?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
