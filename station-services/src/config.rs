/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Service configuration loading.
//!
//! One file configures all four services; each process reads only its own
//! section.  Every key is optional.
//!
//! ```yaml
//! rpc_timeout: 5            # seconds, every outgoing call
//! cache:
//!   listen: 127.0.0.1:8411
//!   event_url: http://127.0.0.1:8412
//!   timeouts:
//!     gps: 120
//!     power: 60
//! event:
//!   listen: 127.0.0.1:8412
//!   table: /var/lib/station/events
//! resources:
//!   listen: 127.0.0.1:8413
//! location:
//!   listen: 127.0.0.1:8414
//!   cache_url: http://127.0.0.1:8411
//!   sources: [gps, iridium]
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::client::DEFAULT_RPC_TIMEOUT;
use crate::location::default_sources;

pub const DEFAULT_CACHE_PORT: u16 = 8411;
pub const DEFAULT_EVENT_PORT: u16 = 8412;
pub const DEFAULT_RESOURCES_PORT: u16 = 8413;
pub const DEFAULT_LOCATION_PORT: u16 = 8414;

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    rpc_timeout: Option<f64>,
    #[serde(default)]
    cache: CacheSection,
    #[serde(default)]
    event: EventSection,
    #[serde(default)]
    resources: ListenSection,
    #[serde(default)]
    location: LocationSection,
}

#[derive(Debug, Default, Deserialize)]
struct CacheSection {
    listen: Option<String>,
    event_url: Option<String>,
    #[serde(default)]
    timeouts: HashMap<String, f64>,
}

#[derive(Debug, Default, Deserialize)]
struct EventSection {
    listen: Option<String>,
    table: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ListenSection {
    listen: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LocationSection {
    listen: Option<String>,
    cache_url: Option<String>,
    sources: Option<Vec<String>>,
}

// ── Public data structures ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub listen: SocketAddr,
    /// Event service to notify on every put; `None` disables notification.
    pub event_url: Option<String>,
    /// Per-key expiry applied at startup, in seconds.
    pub timeouts: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct EventConfig {
    pub listen: SocketAddr,
    /// Flat-file subscription table.
    pub table: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResourcesConfig {
    pub listen: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub listen: SocketAddr,
    pub cache_url: String,
    /// Source names in priority order.
    pub sources: Vec<String>,
}

/// Resolved configuration for all station services.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub rpc_timeout: Duration,
    pub cache: CacheConfig,
    pub event: EventConfig,
    pub resources: ResourcesConfig,
    pub location: LocationConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let cache_listen = loopback(DEFAULT_CACHE_PORT);
        Self {
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            cache: CacheConfig {
                listen: cache_listen,
                event_url: None,
                timeouts: HashMap::new(),
            },
            event: EventConfig {
                listen: loopback(DEFAULT_EVENT_PORT),
                table: PathBuf::from("events"),
            },
            resources: ResourcesConfig {
                listen: loopback(DEFAULT_RESOURCES_PORT),
            },
            location: LocationConfig {
                listen: loopback(DEFAULT_LOCATION_PORT),
                cache_url: url_for(cache_listen),
                sources: default_sources(),
            },
        }
    }
}

fn parse_addr(section: &str, value: Option<String>, default: SocketAddr) -> Result<SocketAddr> {
    match value {
        None => Ok(default),
        Some(text) => text
            .parse()
            .with_context(|| format!("Invalid listen address for {}: {}", section, text)),
    }
}

/// URL of a service listening on `addr`.
pub fn url_for(addr: SocketAddr) -> String {
    format!("http://{}", addr)
}

impl ServiceConfig {
    /// Parses `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid YAML, or
    /// holds an invalid address or timeout.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading service configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: ServiceConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let config = Self::resolve(file)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        debug!(?config, "service configuration resolved");
        Ok(config)
    }

    fn resolve(file: ServiceConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let rpc_timeout = match file.rpc_timeout {
            None => defaults.rpc_timeout,
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
            Some(secs) => bail!("rpc_timeout must be a positive number of seconds, got {}", secs),
        };

        let cache_listen = parse_addr("cache", file.cache.listen, defaults.cache.listen)?;

        Ok(Self {
            rpc_timeout,
            cache: CacheConfig {
                listen: cache_listen,
                event_url: file.cache.event_url,
                timeouts: file.cache.timeouts,
            },
            event: EventConfig {
                listen: parse_addr("event", file.event.listen, defaults.event.listen)?,
                table: file.event.table.unwrap_or(defaults.event.table),
            },
            resources: ResourcesConfig {
                listen: parse_addr("resources", file.resources.listen, defaults.resources.listen)?,
            },
            location: LocationConfig {
                listen: parse_addr("location", file.location.listen, defaults.location.listen)?,
                cache_url: file
                    .location
                    .cache_url
                    .unwrap_or_else(|| url_for(cache_listen)),
                sources: file.location.sources.unwrap_or(defaults.location.sources),
            },
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_without_file() {
        let config = ServiceConfig::default();
        assert_eq!(config.rpc_timeout, Duration::from_secs(5));
        assert_eq!(config.cache.listen.port(), 8411);
        assert!(config.cache.event_url.is_none());
        assert_eq!(config.event.table, PathBuf::from("events"));
        assert_eq!(config.location.sources, vec!["gps", "iridium"]);
        assert_eq!(config.location.cache_url, "http://127.0.0.1:8411");
    }

    #[test]
    fn loads_sections() {
        let f = write_yaml(
            r#"
rpc_timeout: 2.5
cache:
  listen: 0.0.0.0:9000
  event_url: http://10.0.0.2:9001
  timeouts:
    gps: 120
event:
  table: /tmp/events
location:
  sources: [iridium]
"#,
        );
        let config = ServiceConfig::load_from_file(f.path()).unwrap();
        assert_eq!(config.rpc_timeout, Duration::from_millis(2500));
        assert_eq!(config.cache.listen.port(), 9000);
        assert_eq!(config.cache.event_url.as_deref(), Some("http://10.0.0.2:9001"));
        assert_eq!(config.cache.timeouts["gps"], 120.0);
        assert_eq!(config.event.table, PathBuf::from("/tmp/events"));
        assert_eq!(config.location.sources, vec!["iridium"]);
        assert_eq!(config.location.cache_url, "http://0.0.0.0:9000");
    }

    #[test]
    fn rejects_bad_listen_address() {
        let f = write_yaml("resources:\n  listen: not-an-address\n");
        let err = ServiceConfig::load_from_file(f.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("resources"));
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let f = write_yaml("rpc_timeout: 0\n");
        assert!(ServiceConfig::load_from_file(f.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ServiceConfig::load_from_file(Path::new("/nonexistent/services.yaml")).is_err());
    }
}
