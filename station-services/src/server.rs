/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Process wiring: build one service from configuration and serve it until
//! the cancellation token fires.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{info, warn};

use crate::cache::{CacheServer, LocalCache};
use crate::client::{CacheClient, EventClient, Notifier};
use crate::config::ServiceConfig;
use crate::error::{ClientError, ServiceError};
use crate::event::{spawn_delivery_worker, EventServer, GrpcDelivery, SubscriptionTable};
use crate::location::{LocationServer, Locator};
use crate::proto::station_v1::cache_service_server::CacheServiceServer;
use crate::proto::station_v1::event_service_server::EventServiceServer;
use crate::proto::station_v1::location_service_server::LocationServiceServer;
use crate::proto::station_v1::resource_service_server::ResourceServiceServer;
use crate::resources::{ClaimRegistry, ResourceServer};

/// Startup or serving failure of a service process.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("gRPC server failed: {0}")]
    Transport(#[from] tonic::transport::Error),
}

// ── Service construction ──────────────────────────────────────────────────────

/// Cache service with configured timeouts and, when `cache.event_url` is
/// set, put notifications to the event service.
pub fn build_cache(config: &ServiceConfig) -> Result<CacheServiceServer<CacheServer>, ServeError> {
    let notifier: Option<Arc<dyn Notifier>> = match &config.cache.event_url {
        Some(url) => {
            info!(url = %url, "cache puts will notify the event service");
            Some(Arc::new(EventClient::new(url, config.rpc_timeout)?))
        }
        None => {
            warn!("no event service configured; cache puts will not notify");
            None
        }
    };
    let server = CacheServer::new(LocalCache::new(), notifier);
    server.apply_timeouts(&config.cache.timeouts)?;
    Ok(CacheServiceServer::new(server))
}

/// Event service plus its delivery worker.  The worker stops once `cancel`
/// fires and the queue is drained; await the handle before exiting.
pub fn build_event(
    config: &ServiceConfig,
    cancel: CancellationToken,
) -> Result<(EventServiceServer<EventServer>, JoinHandle<()>), ServeError> {
    let table = SubscriptionTable::load(&config.event.table)?;
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let worker = spawn_delivery_worker(
        queue_rx,
        Arc::new(GrpcDelivery::new(config.rpc_timeout)),
        cancel,
    );
    let server = EventServer::new(table, Some(config.event.table.clone()), queue_tx);
    Ok((EventServiceServer::new(server), worker))
}

pub fn build_resources() -> ResourceServiceServer<ResourceServer> {
    ResourceServiceServer::new(ResourceServer::new(ClaimRegistry::new()))
}

pub fn build_location(
    config: &ServiceConfig,
) -> Result<LocationServiceServer<LocationServer>, ServeError> {
    let cache = CacheClient::new(&config.location.cache_url, config.rpc_timeout)?;
    info!(
        cache = %config.location.cache_url,
        sources = ?config.location.sources,
        "location service configured"
    );
    let locator = Locator::new(Arc::new(cache), config.location.sources.clone());
    Ok(LocationServiceServer::new(LocationServer::new(locator)))
}

// ── Serving ───────────────────────────────────────────────────────────────────

pub async fn run_cache(
    config: &ServiceConfig,
    listen: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), ServeError> {
    let service = build_cache(config)?;
    info!(%listen, "cache service listening");
    Server::builder()
        .add_service(service)
        .serve_with_shutdown(listen, cancel.cancelled())
        .await?;
    info!("cache service stopped");
    Ok(())
}

pub async fn run_event(
    config: &ServiceConfig,
    listen: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), ServeError> {
    let (service, worker) = build_event(config, cancel.clone())?;
    info!(%listen, table = %config.event.table.display(), "event service listening");
    let served = Server::builder()
        .add_service(service)
        .serve_with_shutdown(listen, cancel.cancelled())
        .await;

    // A server error must still stop the worker.
    cancel.cancel();
    if let Err(e) = worker.await {
        warn!(error = %e, "delivery worker ended abnormally");
    }
    served?;
    info!("event service stopped");
    Ok(())
}

pub async fn run_resources(listen: SocketAddr, cancel: CancellationToken) -> Result<(), ServeError> {
    info!(%listen, "resource arbiter listening");
    Server::builder()
        .add_service(build_resources())
        .serve_with_shutdown(listen, cancel.cancelled())
        .await?;
    info!("resource arbiter stopped");
    Ok(())
}

pub async fn run_location(
    config: &ServiceConfig,
    listen: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), ServeError> {
    let service = build_location(config)?;
    info!(%listen, "location service listening");
    Server::builder()
        .add_service(service)
        .serve_with_shutdown(listen, cancel.cancelled())
        .await?;
    info!("location service stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_rejects_invalid_configured_timeout() {
        let mut config = ServiceConfig::default();
        config.cache.timeouts.insert("gps".into(), -1.0);
        assert!(matches!(
            build_cache(&config),
            Err(ServeError::Service(ServiceError::InvalidTimeout { .. }))
        ));
    }

    #[tokio::test]
    async fn location_rejects_malformed_cache_url() {
        let mut config = ServiceConfig::default();
        config.location.cache_url = "::not a url::".into();
        assert!(matches!(
            build_location(&config),
            Err(ServeError::Client(ClientError::InvalidUrl(_)))
        ));
    }

    #[tokio::test]
    async fn event_worker_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServiceConfig::default();
        config.event.table = dir.path().join("events");
        let cancel = CancellationToken::new();
        let (_service, worker) = build_event(&config, cancel.clone()).unwrap();
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), worker)
            .await
            .unwrap()
            .unwrap();
    }
}
