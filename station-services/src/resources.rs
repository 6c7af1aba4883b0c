/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Resource arbiter: a registry of the latest full claim set per instrument.
//!
//! The arbiter records claims and nothing more.  Contention between claims
//! that name the same physical resource is left to the resource backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::client::ResourceApi;
use crate::error::ClientError;
use crate::proto::station_v1::resource_service_server::ResourceService;
use crate::proto::station_v1::{Ack, AllocateRequest, ClaimTable, Empty, ResourceList};

/// Instrument → claimed resource names.
#[derive(Debug, Clone, Default)]
pub struct ClaimRegistry {
    claims: Arc<Mutex<BTreeMap<String, Vec<String>>>>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the claim set of `instrument`.  An empty set releases
    /// everything and removes the instrument from the table.  Returns `true`
    /// if the stored claim changed.
    pub fn allocate(&self, instrument: &str, resources: Vec<String>) -> bool {
        let mut claims = self.claims.lock();
        if resources.is_empty() {
            return claims.remove(instrument).is_some();
        }
        let previous = claims.insert(instrument.to_string(), resources.clone());
        previous.as_ref() != Some(&resources)
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.claims.lock().clone()
    }
}

#[tonic::async_trait]
impl ResourceApi for ClaimRegistry {
    async fn allocate(&self, instrument: &str, resources: Vec<String>) -> Result<(), ClientError> {
        ClaimRegistry::allocate(self, instrument, resources);
        Ok(())
    }

    async fn list(&self) -> Result<BTreeMap<String, Vec<String>>, ClientError> {
        Ok(self.snapshot())
    }
}

// ── ResourceServer ────────────────────────────────────────────────────────────

pub struct ResourceServer {
    registry: ClaimRegistry,
}

impl ResourceServer {
    pub fn new(registry: ClaimRegistry) -> Self {
        Self { registry }
    }
}

#[tonic::async_trait]
impl ResourceService for ResourceServer {
    async fn allocate(&self, request: Request<AllocateRequest>) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        if self.registry.allocate(&req.instrument, req.resources.clone()) {
            info!(instrument = %req.instrument, resources = ?req.resources, "claim updated");
        }
        Ok(Response::new(Ack { ok: true }))
    }

    async fn list(&self, _request: Request<Empty>) -> Result<Response<ClaimTable>, Status> {
        let claims = self
            .registry
            .snapshot()
            .into_iter()
            .map(|(instrument, resources)| (instrument, ResourceList { resources }))
            .collect();
        Ok(Response::new(ClaimTable { claims }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn allocate_replaces_full_claim_set() {
        let registry = ClaimRegistry::new();
        registry.allocate("cam1", names(&["camera1=on", "usb=on"]));
        registry.allocate("cam1", names(&["camera1=on"]));
        assert_eq!(registry.snapshot()["cam1"], names(&["camera1=on"]));
    }

    #[test]
    fn allocate_is_idempotent() {
        let registry = ClaimRegistry::new();
        assert!(registry.allocate("cam1", names(&["camera1=on"])));
        assert!(!registry.allocate("cam1", names(&["camera1=on"])));
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn empty_claim_releases_instrument() {
        let registry = ClaimRegistry::new();
        registry.allocate("cam1", names(&["camera1=on"]));
        assert!(registry.allocate("cam1", Vec::new()));
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn server_lists_all_instruments() {
        let server = ResourceServer::new(ClaimRegistry::new());
        for (instrument, resource) in [("cam2", "camera2=on"), ("cam1", "camera1=on")] {
            server
                .allocate(Request::new(AllocateRequest {
                    instrument: instrument.into(),
                    resources: names(&[resource]),
                }))
                .await
                .unwrap();
        }

        let table = server.list(Request::new(Empty {})).await.unwrap().into_inner();
        assert_eq!(table.claims.len(), 2);
        assert_eq!(table.claims["cam2"].resources, names(&["camera2=on"]));
    }
}
