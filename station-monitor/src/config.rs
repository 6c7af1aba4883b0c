/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Monitor configuration loading.
//!
//! ```yaml
//! instrument:
//!   name: allsky
//!   kind: script            # script | pdu
//!   resources: [camera=on]
//! services:
//!   cache: http://127.0.0.1:8411
//!   resources: http://127.0.0.1:8413
//!   location: http://127.0.0.1:8414
//!   rpc_timeout: 5
//! schedule:
//!   files: [/etc/station/schedules/allsky*.yaml]
//!   rate: 60
//!   window: solar           # periodic | solar | night | power
//!   cadence: daynight       # fixed | daynight | power
//! force:
//!   window: /run/station/allsky.window
//!   sample: /run/station/allsky.sample
//! output:
//!   name: allsky-%Y%m%d-%H%M%S.jpg
//!   staging: /var/spool/allsky
//!   path: /data/allsky
//! settings:
//!   day.sample.rate: 1m
//! script:
//!   sample: [capture, --stdout]
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_yaml::Mapping;
use tracing::{debug, info};

use station_services::client::DEFAULT_RPC_TIMEOUT;
use station_services::config::{
    url_for, DEFAULT_CACHE_PORT, DEFAULT_LOCATION_PORT, DEFAULT_RESOURCES_PORT,
};

use crate::duration;
use crate::machine::{MachineSettings, DEFAULT_TICK};
use crate::output::{OutputConfig, DEFAULT_NAME};
use crate::pdu::{Rail, RetryPolicy};
use crate::script::ScriptConfig;

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
    instrument: InstrumentSection,
    #[serde(default)]
    services: ServicesSection,
    #[serde(default)]
    schedule: ScheduleSection,
    #[serde(default)]
    force: ForceSection,
    output: Option<OutputSection>,
    #[serde(default)]
    settings: Mapping,
    script: Option<ScriptSection>,
    pdu: Option<PduSection>,
}

#[derive(Debug, Deserialize)]
struct InstrumentSection {
    name: String,
    kind: InstrumentKind,
    #[serde(default)]
    resources: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServicesSection {
    cache: Option<String>,
    resources: Option<String>,
    location: Option<String>,
    #[serde(default, deserialize_with = "duration::optional")]
    rpc_timeout: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
struct ScheduleSection {
    #[serde(default)]
    files: Vec<String>,
    #[serde(default, deserialize_with = "duration::optional")]
    rate: Option<Duration>,
    #[serde(default)]
    window: WindowKind,
    #[serde(default)]
    cadence: CadenceKind,
}

#[derive(Debug, Default, Deserialize)]
struct ForceSection {
    window: Option<PathBuf>,
    sample: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct OutputSection {
    #[serde(default = "default_true")]
    enabled: bool,
    name: Option<String>,
    #[serde(default, deserialize_with = "duration::optional")]
    rate: Option<Duration>,
    staging: Option<PathBuf>,
    path: Option<PathBuf>,
    #[serde(default = "default_true")]
    compress: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptSection {
    open: Option<Vec<String>>,
    close: Option<Vec<String>>,
    status: Option<Vec<String>>,
    sample: Option<Vec<String>>,
    #[serde(default, deserialize_with = "duration::optional")]
    timeout: Option<Duration>,
    device_lock: Option<PathBuf>,
    #[serde(default)]
    power_cycle: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PduSection {
    unit: String,
    program: Option<String>,
    #[serde(default = "default_true")]
    control: bool,
    #[serde(default, deserialize_with = "duration::optional")]
    timeout: Option<Duration>,
    #[serde(default)]
    retry: RetrySection,
    #[serde(default)]
    rails: Vec<Rail>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrySection {
    max: Option<u32>,
    #[serde(default, deserialize_with = "duration::optional")]
    wait: Option<Duration>,
}

fn default_true() -> bool {
    true
}

// ── Public data structures ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Script,
    Pdu,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    Periodic,
    Solar,
    Night,
    Power,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CadenceKind {
    #[default]
    Fixed,
    DayNight,
    Power,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceUrls {
    pub cache: String,
    pub resources: String,
    pub location: String,
    pub rpc_timeout: Duration,
}

impl Default for ServiceUrls {
    fn default() -> Self {
        let local = |port: u16| url_for(SocketAddr::from(([127, 0, 0, 1], port)));
        Self {
            cache: local(DEFAULT_CACHE_PORT),
            resources: local(DEFAULT_RESOURCES_PORT),
            location: local(DEFAULT_LOCATION_PORT),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PduConfig {
    pub unit: String,
    pub program: String,
    pub control: bool,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub rails: Vec<Rail>,
}

#[derive(Debug, Clone)]
pub enum InstrumentSetup {
    Script(ScriptConfig),
    Pdu(PduConfig),
}

/// Resolved monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub name: String,
    pub services: ServiceUrls,
    pub machine: MachineSettings,
    pub window: WindowKind,
    pub cadence: CadenceKind,
    pub output: Option<OutputConfig>,
    pub instrument: InstrumentSetup,
}

impl MonitorConfig {
    /// Parses `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid YAML, or the
    /// instrument section for the configured kind is missing.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading monitor configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: MonitorConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let config = Self::resolve(file)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        debug!(?config, "monitor configuration resolved");
        Ok(config)
    }

    fn resolve(file: MonitorConfigFile) -> Result<Self> {
        let name = file.instrument.name;
        if name.trim().is_empty() {
            bail!("instrument.name must not be empty");
        }

        let defaults = ServiceUrls::default();
        let services = ServiceUrls {
            cache: file.services.cache.unwrap_or(defaults.cache),
            resources: file.services.resources.unwrap_or(defaults.resources),
            location: file.services.location.unwrap_or(defaults.location),
            rpc_timeout: file.services.rpc_timeout.unwrap_or(defaults.rpc_timeout),
        };
        if services.rpc_timeout.is_zero() {
            bail!("services.rpc_timeout must be greater than zero");
        }

        let tick = file.schedule.rate.unwrap_or(DEFAULT_TICK);
        if tick.is_zero() {
            bail!("schedule.rate must be greater than zero");
        }
        if file.schedule.files.is_empty() {
            bail!("schedule.files must name at least one schedule file pattern");
        }

        let machine = MachineSettings {
            schedule_files: file.schedule.files,
            tick,
            window_flag: file.force.window,
            sample_flag: file.force.sample,
            resources: file.instrument.resources,
            options: file.settings,
        };

        let output = file.output.filter(|o| o.enabled).map(|o| {
            let staging = o.staging.unwrap_or_else(|| PathBuf::from("."));
            OutputConfig {
                name: o.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
                rate: o.rate,
                path: o.path.unwrap_or_else(|| staging.clone()),
                staging,
                compress: o.compress,
            }
        });

        let instrument = match file.instrument.kind {
            InstrumentKind::Script => {
                let Some(s) = file.script else {
                    bail!("instrument kind 'script' needs a 'script' section");
                };
                InstrumentSetup::Script(ScriptConfig {
                    open: s.open,
                    close: s.close,
                    status: s.status,
                    sample: s.sample,
                    timeout: s.timeout,
                    device_lock: s.device_lock,
                    power_cycle_on_failure: s.power_cycle,
                })
            }
            InstrumentKind::Pdu => {
                let Some(p) = file.pdu else {
                    bail!("instrument kind 'pdu' needs a 'pdu' section");
                };
                let defaults = RetryPolicy::default();
                InstrumentSetup::Pdu(PduConfig {
                    unit: p.unit,
                    program: p.program.unwrap_or_else(|| "pductl".to_string()),
                    control: p.control,
                    timeout: p.timeout.unwrap_or(Duration::from_secs(10)),
                    retry: RetryPolicy {
                        max: p.retry.max.unwrap_or(defaults.max),
                        wait: p.retry.wait.unwrap_or(defaults.wait),
                    },
                    rails: p.rails,
                })
            }
        };

        Ok(Self {
            name,
            services,
            machine,
            window: file.schedule.window,
            cadence: file.schedule.cadence,
            output,
            instrument,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
