/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Resource claims held by one instrument.
//!
//! Claims are `name=value` strings (`camera1=on`, `serial=/dev/ttyS1`).  An
//! instrument holds at most one claim per name.  Every change sends the full
//! claim set to the arbiter, so the arbiter never has to merge.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use station_services::client::ResourceApi;
use station_services::error::ClientError;

fn claim_name(resource: &str) -> &str {
    resource.split_once('=').map_or(resource, |(name, _)| name)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSet {
    by_name: BTreeMap<String, String>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every claim.
    pub fn set<I, S>(&mut self, resources: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.by_name.clear();
        for resource in resources {
            self.add(resource);
        }
    }

    /// Adds `resource`, replacing any claim with the same name.
    pub fn add(&mut self, resource: impl Into<String>) {
        let resource = resource.into();
        self.by_name
            .insert(claim_name(&resource).to_string(), resource);
    }

    /// Removes the claim named by `resource` (either `name` or `name=value`).
    pub fn free(&mut self, resource: &str) -> bool {
        self.by_name.remove(claim_name(resource)).is_some()
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.by_name.values().cloned().collect()
    }
}

/// An instrument's claim set, mirrored to the resource arbiter.
#[derive(Clone)]
pub struct ResourceTracker {
    instrument: String,
    claims: ClaimSet,
    arbiter: Arc<dyn ResourceApi>,
}

impl ResourceTracker {
    pub fn new(instrument: impl Into<String>, arbiter: Arc<dyn ResourceApi>) -> Self {
        Self {
            instrument: instrument.into(),
            claims: ClaimSet::new(),
            arbiter,
        }
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    async fn publish(&self) -> Result<(), ClientError> {
        let resources = self.claims.to_vec();
        info!(instrument = %self.instrument, resources = ?resources, "allocating resources");
        self.arbiter.allocate(&self.instrument, resources).await
    }

    pub async fn set_resources(&mut self, resources: &[String]) -> Result<(), ClientError> {
        self.claims.set(resources.iter().cloned());
        self.publish().await
    }

    pub async fn add_resource(&mut self, resource: &str) -> Result<(), ClientError> {
        self.claims.add(resource);
        self.publish().await
    }

    pub async fn free_resource(&mut self, resource: &str) -> Result<(), ClientError> {
        self.claims.free(resource);
        self.publish().await
    }

    pub async fn clear_resources(&mut self) -> Result<(), ClientError> {
        self.claims.clear();
        self.publish().await
    }
}
