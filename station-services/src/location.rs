/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Best-source station position.
//!
//! Each configured source (`gps`, `iridium`, ...) publishes its latest fix
//! into the cache under its own name.  `best()` walks the sources in
//! priority order and returns the first one holding a usable fix.

use std::sync::Arc;

use serde_json::Value;
use tonic::{Request, Response, Status};
use tracing::{debug, error};

use crate::client::{CacheApi, LocationApi};
use crate::error::ClientError;
use crate::proto::station_v1::location_service_server::LocationService;
use crate::proto::station_v1::{BestReply, Empty, Fix};

/// Default source priority.
pub fn default_sources() -> Vec<String> {
    vec!["gps".to_string(), "iridium".to_string()]
}

/// GNSS fix mode below which a `gps` entry carries no position.
const MIN_GPS_MODE: i64 = 2;

/// Resolves the best fix from the cache.
#[derive(Clone)]
pub struct Locator {
    cache: Arc<dyn CacheApi>,
    sources: Vec<String>,
}

impl Locator {
    pub fn new(cache: Arc<dyn CacheApi>, sources: Vec<String>) -> Self {
        Self { cache, sources }
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }
}

/// Extracts a fix from one cache entry, or `None` if the entry is unusable.
fn fix_from_entry(source: &str, entry: &Value) -> Option<Fix> {
    if source == "gps" {
        let mode = entry.get("mode").and_then(Value::as_i64).unwrap_or(0);
        if mode < MIN_GPS_MODE {
            return None;
        }
    }
    let latitude = entry.get("latitude")?.as_f64()?;
    let longitude = entry.get("longitude")?.as_f64()?;
    Some(Fix {
        src: source.to_string(),
        latitude,
        longitude,
    })
}

#[tonic::async_trait]
impl LocationApi for Locator {
    async fn best(&self) -> Result<Option<Fix>, ClientError> {
        let present = self.cache.list().await?;
        for source in &self.sources {
            if !present.contains(source) {
                continue;
            }
            let entry = match self.cache.get(source).await {
                Ok(entry) => entry,
                // Expired between list and get.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            match fix_from_entry(source, &entry) {
                Some(fix) => return Ok(Some(fix)),
                None => debug!(source = %source, "source has no usable fix"),
            }
        }
        Ok(None)
    }
}

// ── LocationServer ────────────────────────────────────────────────────────────

pub struct LocationServer {
    locator: Locator,
}

impl LocationServer {
    pub fn new(locator: Locator) -> Self {
        Self { locator }
    }
}

#[tonic::async_trait]
impl LocationService for LocationServer {
    async fn best(&self, _request: Request<Empty>) -> Result<Response<BestReply>, Status> {
        let fix = match self.locator.best().await {
            Ok(fix) => fix,
            Err(e) => {
                error!(error = %e, "cache lookup failed while resolving location");
                None
            }
        };
        Ok(Response::new(BestReply { fix }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
