/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Typed clients for the station services.
//!
//! Every service is reached through a small async trait so that callers
//! (monitors, the location service, tools) can be exercised against an
//! in-process implementation:
//!
//! | Trait | gRPC client | In-process |
//! |---|---|---|
//! | [`CacheApi`] | [`CacheClient`] | [`LocalCache`](crate::cache::LocalCache) |
//! | [`Notifier`] | [`EventClient`] | – |
//! | [`ResourceApi`] | [`ResourceClient`] | [`ClaimRegistry`](crate::resources::ClaimRegistry) |
//! | [`LocationApi`] | [`LocationClient`] | – |
//!
//! Channels connect lazily: building a client never blocks, and an
//! unreachable service only shows up as a [`ClientError`] on the first call.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use tonic::transport::{Channel, Endpoint};

use crate::error::ClientError;
use crate::proto::station_v1::cache_service_client::CacheServiceClient;
use crate::proto::station_v1::event_service_client::EventServiceClient;
use crate::proto::station_v1::location_service_client::LocationServiceClient;
use crate::proto::station_v1::resource_service_client::ResourceServiceClient;
use crate::proto::station_v1::{
    AllocateRequest, Empty, EventName, Fix, GetOrDefaultRequest, KeyRequest, NotifyRequest,
    Observer, PutRequest, SetTimeoutRequest, Subscription,
};

/// Default per-call timeout for every remote call.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

// ── Traits ────────────────────────────────────────────────────────────────────

/// Access to the shared key/value cache.
#[tonic::async_trait]
pub trait CacheApi: Send + Sync {
    async fn get(&self, key: &str) -> Result<Value, ClientError>;
    async fn get_or_default(&self, key: &str, default: Value) -> Result<Value, ClientError>;
    async fn get_age(&self, key: &str) -> Result<f64, ClientError>;
    async fn put(&self, key: &str, value: Value) -> Result<(), ClientError>;
    async fn list(&self) -> Result<Vec<String>, ClientError>;
    async fn clear(&self, key: &str) -> Result<(), ClientError>;
    async fn set_timeout(&self, key: &str, seconds: f64) -> Result<(), ClientError>;
    async fn get_timeout(&self, key: &str) -> Result<Option<f64>, ClientError>;
    async fn clear_timeout(&self, key: &str) -> Result<(), ClientError>;
}

/// Publishing side of the event service.
#[tonic::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &str, args: Vec<Value>) -> Result<(), ClientError>;
}

/// Resource arbiter: records the full claim set of each instrument.
#[tonic::async_trait]
pub trait ResourceApi: Send + Sync {
    async fn allocate(&self, instrument: &str, resources: Vec<String>) -> Result<(), ClientError>;
    async fn list(&self) -> Result<BTreeMap<String, Vec<String>>, ClientError>;
}

/// Best available station position.
#[tonic::async_trait]
pub trait LocationApi: Send + Sync {
    async fn best(&self) -> Result<Option<Fix>, ClientError>;
}

// ── Channel construction ──────────────────────────────────────────────────────

/// Builds a lazily-connected channel to `url` (e.g. `http://127.0.0.1:8412`)
/// with both connect and request timeouts set to `timeout`.
pub fn connect_lazy(url: &str, timeout: Duration) -> Result<Channel, ClientError> {
    let endpoint = Endpoint::from_shared(url.to_string())
        .map_err(|_| ClientError::InvalidUrl(url.to_string()))?
        .connect_timeout(timeout)
        .timeout(timeout);
    Ok(endpoint.connect_lazy())
}

fn parse_json(text: &str) -> Result<Value, ClientError> {
    Ok(serde_json::from_str(text)?)
}

// ── CacheClient ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CacheClient {
    inner: CacheServiceClient<Channel>,
}

impl CacheClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            inner: CacheServiceClient::new(connect_lazy(url, timeout)?),
        })
    }
}

#[tonic::async_trait]
impl CacheApi for CacheClient {
    async fn get(&self, key: &str) -> Result<Value, ClientError> {
        let reply = self
            .inner
            .clone()
            .get(KeyRequest { key: key.into() })
            .await?
            .into_inner();
        parse_json(&reply.value_json)
    }

    async fn get_or_default(&self, key: &str, default: Value) -> Result<Value, ClientError> {
        let reply = self
            .inner
            .clone()
            .get_or_default(GetOrDefaultRequest {
                key: key.into(),
                default_json: default.to_string(),
            })
            .await?
            .into_inner();
        parse_json(&reply.value_json)
    }

    async fn get_age(&self, key: &str) -> Result<f64, ClientError> {
        let reply = self
            .inner
            .clone()
            .get_age(KeyRequest { key: key.into() })
            .await?;
        Ok(reply.into_inner().seconds)
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), ClientError> {
        self.inner
            .clone()
            .put(PutRequest {
                key: key.into(),
                value_json: value.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, ClientError> {
        let reply = self.inner.clone().list(Empty {}).await?;
        Ok(reply.into_inner().keys)
    }

    async fn clear(&self, key: &str) -> Result<(), ClientError> {
        self.inner
            .clone()
            .clear(KeyRequest { key: key.into() })
            .await?;
        Ok(())
    }

    async fn set_timeout(&self, key: &str, seconds: f64) -> Result<(), ClientError> {
        self.inner
            .clone()
            .set_timeout(SetTimeoutRequest {
                key: key.into(),
                seconds,
            })
            .await?;
        Ok(())
    }

    async fn get_timeout(&self, key: &str) -> Result<Option<f64>, ClientError> {
        let reply = self
            .inner
            .clone()
            .get_timeout(KeyRequest { key: key.into() })
            .await?;
        Ok(reply.into_inner().seconds)
    }

    async fn clear_timeout(&self, key: &str) -> Result<(), ClientError> {
        self.inner
            .clone()
            .clear_timeout(KeyRequest { key: key.into() })
            .await?;
        Ok(())
    }
}

// ── EventClient ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EventClient {
    inner: EventServiceClient<Channel>,
}

impl EventClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            inner: EventServiceClient::new(connect_lazy(url, timeout)?),
        })
    }

    pub async fn register(&self, event: &str, url: &str, method: &str) -> Result<(), ClientError> {
        self.inner
            .clone()
            .register(subscription(event, url, method))
            .await?;
        Ok(())
    }

    pub async fn unregister(
        &self,
        event: &str,
        url: &str,
        method: &str,
    ) -> Result<(), ClientError> {
        self.inner
            .clone()
            .unregister(subscription(event, url, method))
            .await?;
        Ok(())
    }

    pub async fn list_events(&self) -> Result<Vec<String>, ClientError> {
        let reply = self.inner.clone().list_events(Empty {}).await?;
        Ok(reply.into_inner().events)
    }

    pub async fn list_observers(&self, event: &str) -> Result<Vec<Observer>, ClientError> {
        let reply = self
            .inner
            .clone()
            .list_observers(EventName {
                event: event.into(),
            })
            .await?;
        Ok(reply.into_inner().observers)
    }

    pub async fn remove_event(&self, event: &str) -> Result<(), ClientError> {
        self.inner
            .clone()
            .remove_event(EventName {
                event: event.into(),
            })
            .await?;
        Ok(())
    }
}

fn subscription(event: &str, url: &str, method: &str) -> Subscription {
    Subscription {
        event: event.into(),
        url: url.into(),
        method: method.into(),
    }
}

#[tonic::async_trait]
impl Notifier for EventClient {
    async fn notify(&self, event: &str, args: Vec<Value>) -> Result<(), ClientError> {
        self.inner
            .clone()
            .notify(NotifyRequest {
                event: event.into(),
                args_json: args.iter().map(Value::to_string).collect(),
            })
            .await?;
        Ok(())
    }
}

// ── ResourceClient ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResourceClient {
    inner: ResourceServiceClient<Channel>,
}

impl ResourceClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            inner: ResourceServiceClient::new(connect_lazy(url, timeout)?),
        })
    }
}

#[tonic::async_trait]
impl ResourceApi for ResourceClient {
    async fn allocate(&self, instrument: &str, resources: Vec<String>) -> Result<(), ClientError> {
        self.inner
            .clone()
            .allocate(AllocateRequest {
                instrument: instrument.into(),
                resources,
            })
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<BTreeMap<String, Vec<String>>, ClientError> {
        let reply = self.inner.clone().list(Empty {}).await?.into_inner();
        Ok(reply
            .claims
            .into_iter()
            .map(|(instrument, list)| (instrument, list.resources))
            .collect())
    }
}

// ── LocationClient ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LocationClient {
    inner: LocationServiceClient<Channel>,
}

impl LocationClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            inner: LocationServiceClient::new(connect_lazy(url, timeout)?),
        })
    }
}

#[tonic::async_trait]
impl LocationApi for LocationClient {
    async fn best(&self) -> Result<Option<Fix>, ClientError> {
        let reply = self.inner.clone().best(Empty {}).await?;
        Ok(reply.into_inner().fix)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
