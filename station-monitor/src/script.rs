/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Instrument driven by external commands.
//!
//! `open`, `close`, `status` and `sample` are argv lists.  The sample
//! command's stdout is the sample.  `status` exiting 0 means the device is
//! powered; without a `status` command the power state is not observed.
//! With a `device_lock`, every command runs while holding the lock file.

use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::lockfile::{LockFile, LockGuard};
use crate::machine::{Instrument, InstrumentContext, InstrumentError};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptConfig {
    pub open: Option<Vec<String>>,
    pub close: Option<Vec<String>>,
    pub status: Option<Vec<String>>,
    pub sample: Option<Vec<String>>,
    pub timeout: Option<Duration>,
    pub device_lock: Option<PathBuf>,
    /// A failing sample command powers the device off.
    pub power_cycle_on_failure: bool,
}

pub struct ScriptInstrument {
    config: ScriptConfig,
}

impl ScriptInstrument {
    pub fn new(config: ScriptConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        self.config.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT)
    }

    async fn lock_device(&self) -> Result<Option<LockGuard>, InstrumentError> {
        let Some(path) = self.config.device_lock.clone() else {
            return Ok(None);
        };
        let guard = tokio::task::spawn_blocking(move || LockFile::new(path).lock())
            .await
            .map_err(|e| InstrumentError::Device(format!("lock task failed: {}", e)))??;
        Ok(Some(guard))
    }

    /// Runs `argv` to completion and returns its output, whatever the exit
    /// status.
    async fn execute(&self, argv: &[String]) -> Result<Output, InstrumentError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(InstrumentError::Device("empty command".into()));
        };
        let command = argv.join(" ");
        let _guard = self.lock_device().await?;

        debug!(command = %command, "running");
        let child = Command::new(program).args(args).kill_on_drop(true).output();
        match tokio::time::timeout(self.timeout(), child).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(InstrumentError::Timeout {
                command,
                after: self.timeout(),
            }),
        }
    }

    async fn run_checked(&self, argv: &[String]) -> Result<Vec<u8>, InstrumentError> {
        let output = self.execute(argv).await?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(InstrumentError::Command {
            command: argv.join(" "),
            status: format!("{} {}", output.status, stderr.trim()),
        })
    }

    async fn run_optional(&self, argv: &Option<Vec<String>>) -> Result<(), InstrumentError> {
        match argv {
            Some(argv) => self.run_checked(argv).await.map(|_| ()),
            None => Ok(()),
        }
    }
}

#[tonic::async_trait]
impl Instrument for ScriptInstrument {
    async fn is_on(&mut self, _ctx: &mut InstrumentContext) -> Result<Option<bool>, InstrumentError> {
        match &self.config.status {
            Some(argv) => Ok(Some(self.execute(argv).await?.status.success())),
            None => Ok(None),
        }
    }

    async fn going_off_to_on(&mut self, _ctx: &mut InstrumentContext) -> Result<(), InstrumentError> {
        self.run_optional(&self.config.open).await
    }

    async fn sample(&mut self, _ctx: &mut InstrumentContext) -> Result<Option<Vec<u8>>, InstrumentError> {
        let Some(argv) = &self.config.sample else {
            return Ok(None);
        };
        match self.run_checked(argv).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if self.config.power_cycle_on_failure => {
                warn!("sample command failed, requesting power cycle: {}", e);
                Err(InstrumentError::DeviceUnhealthy(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn going_on_to_off(&mut self, _ctx: &mut InstrumentContext) -> Result<(), InstrumentError> {
        self.run_optional(&self.config.close).await
    }
}
