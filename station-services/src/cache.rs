/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Short-lived key/value cache used as a shared blackboard between stations
//! processes (position fixes, power status, system health).
//!
//! ```text
//! put ──► CacheStore ──► EventService.notify(key, value)
//!            ▲
//!            └── expiry sweep runs at the start of every call
//! ```
//!
//! Expiry is lazy: a key whose age exceeds its timeout is only evicted when
//! the next request reaches the service.  Under low request volume entries
//! therefore outlive their nominal timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::client::{CacheApi, Notifier};
use crate::error::{ClientError, ServiceError};
use crate::proto::station_v1::cache_service_server::CacheService;
use crate::proto::station_v1::{
    Ack, AgeReply, Empty, GetOrDefaultRequest, KeyList, KeyRequest, PutRequest,
    SetTimeoutRequest, TimeoutReply, ValueReply,
};

// ── CacheStore ────────────────────────────────────────────────────────────────

/// One cached value and the instant it was last written.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub written: Instant,
}

/// The cache table.  Every method takes the current instant explicitly so
/// expiry can be exercised without sleeping.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    /// Per-key timeout in seconds.  Survives eviction and `clear`, so a key
    /// written again later picks its timeout back up.
    timeouts: HashMap<String, f64>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`.
    pub fn put(&mut self, key: &str, value: Value, now: Instant) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                written: now,
            },
        );
    }

    pub fn get(&self, key: &str) -> Result<&Value, ServiceError> {
        self.entries
            .get(key)
            .map(|entry| &entry.value)
            .ok_or_else(|| ServiceError::KeyNotFound(key.to_string()))
    }

    pub fn get_or_default(&self, key: &str, default: Value) -> Value {
        self.entries
            .get(key)
            .map(|entry| entry.value.clone())
            .unwrap_or(default)
    }

    /// Seconds since the last `put` of `key`.
    pub fn age(&self, key: &str, now: Instant) -> Result<f64, ServiceError> {
        self.entries
            .get(key)
            .map(|entry| now.saturating_duration_since(entry.written).as_secs_f64())
            .ok_or_else(|| ServiceError::KeyNotFound(key.to_string()))
    }

    /// All keys, sorted for deterministic output.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remove `key`.  Returns `true` if it was present.
    pub fn clear(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn set_timeout(&mut self, key: &str, seconds: f64) -> Result<(), ServiceError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ServiceError::InvalidTimeout {
                key: key.to_string(),
                seconds,
            });
        }
        self.timeouts.insert(key.to_string(), seconds);
        Ok(())
    }

    pub fn clear_timeout(&mut self, key: &str) {
        self.timeouts.remove(key);
    }

    pub fn timeout(&self, key: &str) -> Option<f64> {
        self.timeouts.get(key).copied()
    }

    /// Evict every entry whose age is strictly greater than its timeout and
    /// return the evicted keys.  Keys without a timeout never expire.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .timeouts
            .iter()
            .filter(|(key, timeout)| {
                self.entries.get(key.as_str()).is_some_and(|entry| {
                    now.saturating_duration_since(entry.written).as_secs_f64() > **timeout
                })
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
        }
        expired
    }
}

// ── LocalCache ────────────────────────────────────────────────────────────────

/// Shared handle to a [`CacheStore`] that sweeps expired entries on every
/// access.
///
/// The gRPC server is a thin layer over this type, and it also implements
/// [`CacheApi`] so in-process callers (and tests) can use a cache without a
/// network hop.
#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    store: Arc<Mutex<CacheStore>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the store, runs the expiry sweep, then hands the store to `f`.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut CacheStore, Instant) -> R) -> R {
        let now = Instant::now();
        let mut store = self.store.lock();
        let evicted = store.expire(now);
        if !evicted.is_empty() {
            debug!(keys = ?evicted, "expired cache entries");
        }
        f(&mut store, now)
    }
}

fn to_client(err: ServiceError) -> ClientError {
    ClientError::Status(err.into())
}

#[tonic::async_trait]
impl CacheApi for LocalCache {
    async fn get(&self, key: &str) -> Result<Value, ClientError> {
        self.with_store(|store, _| store.get(key).cloned())
            .map_err(to_client)
    }

    async fn get_or_default(&self, key: &str, default: Value) -> Result<Value, ClientError> {
        Ok(self.with_store(|store, _| store.get_or_default(key, default)))
    }

    async fn get_age(&self, key: &str) -> Result<f64, ClientError> {
        self.with_store(|store, now| store.age(key, now))
            .map_err(to_client)
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), ClientError> {
        self.with_store(|store, now| store.put(key, value, now));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.with_store(|store, _| store.keys()))
    }

    async fn clear(&self, key: &str) -> Result<(), ClientError> {
        self.with_store(|store, _| store.clear(key));
        Ok(())
    }

    async fn set_timeout(&self, key: &str, seconds: f64) -> Result<(), ClientError> {
        self.with_store(|store, _| store.set_timeout(key, seconds))
            .map_err(to_client)
    }

    async fn get_timeout(&self, key: &str) -> Result<Option<f64>, ClientError> {
        Ok(self.with_store(|store, _| store.timeout(key)))
    }

    async fn clear_timeout(&self, key: &str) -> Result<(), ClientError> {
        self.with_store(|store, _| store.clear_timeout(key));
        Ok(())
    }
}

// ── CacheServer ───────────────────────────────────────────────────────────────

/// gRPC front end of the cache.  Every `put` is forwarded to the event
/// service (when configured) as `notify(key, value)`.
pub struct CacheServer {
    cache: LocalCache,
    notifier: Option<Arc<dyn Notifier>>,
}

impl CacheServer {
    pub fn new(cache: LocalCache, notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self { cache, notifier }
    }

    /// Applies startup timeouts from configuration.
    pub fn apply_timeouts(&self, timeouts: &HashMap<String, f64>) -> Result<(), ServiceError> {
        self.cache.with_store(|store, _| {
            for (key, seconds) in timeouts {
                store.set_timeout(key, *seconds)?;
                info!(key = %key, seconds = seconds, "cache timeout configured");
            }
            Ok(())
        })
    }
}

fn encode(value: &Value) -> String {
    value.to_string()
}

fn ack() -> Response<Ack> {
    Response::new(Ack { ok: true })
}

#[tonic::async_trait]
impl CacheService for CacheServer {
    async fn get(&self, request: Request<KeyRequest>) -> Result<Response<ValueReply>, Status> {
        let key = request.into_inner().key;
        let value = self.cache.with_store(|store, _| store.get(&key).map(encode))?;
        Ok(Response::new(ValueReply { value_json: value }))
    }

    async fn get_or_default(
        &self,
        request: Request<GetOrDefaultRequest>,
    ) -> Result<Response<ValueReply>, Status> {
        let req = request.into_inner();
        let default: Value = serde_json::from_str(&req.default_json)
            .map_err(|e| Status::from(ServiceError::from(e)))?;
        let value = self
            .cache
            .with_store(|store, _| encode(&store.get_or_default(&req.key, default)));
        Ok(Response::new(ValueReply { value_json: value }))
    }

    async fn get_age(&self, request: Request<KeyRequest>) -> Result<Response<AgeReply>, Status> {
        let key = request.into_inner().key;
        let seconds = self.cache.with_store(|store, now| store.age(&key, now))?;
        Ok(Response::new(AgeReply { seconds }))
    }

    async fn put(&self, request: Request<PutRequest>) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let value: Value = serde_json::from_str(&req.value_json)
            .map_err(|e| Status::from(ServiceError::from(e)))?;

        // The store lock must be released before the notification await.
        self.cache
            .with_store(|store, now| store.put(&req.key, value.clone(), now));
        debug!(key = %req.key, "cache put");

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(&req.key, vec![value]).await {
                warn!(key = %req.key, error = %e, "failed to notify event service");
            }
        }

        Ok(ack())
    }

    async fn list(&self, _request: Request<Empty>) -> Result<Response<KeyList>, Status> {
        let keys = self.cache.with_store(|store, _| store.keys());
        Ok(Response::new(KeyList { keys }))
    }

    async fn clear(&self, request: Request<KeyRequest>) -> Result<Response<Ack>, Status> {
        let key = request.into_inner().key;
        self.cache.with_store(|store, _| store.clear(&key));
        Ok(ack())
    }

    async fn set_timeout(
        &self,
        request: Request<SetTimeoutRequest>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        self.cache
            .with_store(|store, _| store.set_timeout(&req.key, req.seconds))?;
        Ok(ack())
    }

    async fn get_timeout(
        &self,
        request: Request<KeyRequest>,
    ) -> Result<Response<TimeoutReply>, Status> {
        let key = request.into_inner().key;
        let seconds = self.cache.with_store(|store, _| store.timeout(&key));
        Ok(Response::new(TimeoutReply { seconds }))
    }

    async fn clear_timeout(&self, request: Request<KeyRequest>) -> Result<Response<Ack>, Status> {
        let key = request.into_inner().key;
        self.cache.with_store(|store, _| store.clear_timeout(&key));
        Ok(ack())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    /// Records every notification instead of sending it.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, Vec<Value>)>>,
    }

    #[tonic::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: &str, args: Vec<Value>) -> Result<(), ClientError> {
            self.sent.lock().push((event.to_string(), args));
            Ok(())
        }
    }

    struct FailingNotifier;

    #[tonic::async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _event: &str, _args: Vec<Value>) -> Result<(), ClientError> {
            Err(ClientError::Status(Status::unavailable("event service down")))
        }
    }

    // ── CacheStore ────────────────────────────────────────────────────────────

    #[test]
    fn put_then_get_returns_value() {
        let mut store = CacheStore::new();
        let now = Instant::now();
        store.put("k", json!({"a": 1}), now);
        assert_eq!(store.get("k").unwrap(), &json!({"a": 1}));
    }

    #[test]
    fn get_missing_key_fails() {
        let store = CacheStore::new();
        assert!(matches!(
            store.get("nope"),
            Err(ServiceError::KeyNotFound(k)) if k == "nope"
        ));
    }

    #[test]
    fn put_overwrites_and_resets_age() {
        let mut store = CacheStore::new();
        let t0 = Instant::now();
        store.put("k", json!(1), t0);
        let t1 = t0 + Duration::from_secs(5);
        assert!((store.age("k", t1).unwrap() - 5.0).abs() < 1e-9);

        store.put("k", json!(2), t1);
        assert_eq!(store.get("k").unwrap(), &json!(2));
        assert_eq!(store.age("k", t1).unwrap(), 0.0);
    }

    #[test]
    fn age_is_monotonic_until_next_put() {
        let mut store = CacheStore::new();
        let t0 = Instant::now();
        store.put("k", json!("v"), t0);

        let mut last = store.age("k", t0).unwrap();
        assert_eq!(last, 0.0);
        for step in 1..5 {
            let age = store.age("k", t0 + Duration::from_millis(250 * step)).unwrap();
            assert!(age >= last);
            last = age;
        }
    }

    #[test]
    fn get_or_default_falls_back() {
        let mut store = CacheStore::new();
        assert_eq!(store.get_or_default("k", json!(null)), json!(null));
        store.put("k", json!(3), Instant::now());
        assert_eq!(store.get_or_default("k", json!(null)), json!(3));
    }

    #[test]
    fn entry_expires_after_timeout() {
        let mut store = CacheStore::new();
        let t0 = Instant::now();
        store.put("k", json!(1), t0);
        store.set_timeout("k", 1.0).unwrap();

        // Not yet: age == timeout is not expired
        assert!(store.expire(t0 + Duration::from_secs(1)).is_empty());
        assert_eq!(store.keys(), vec!["k".to_string()]);

        let evicted = store.expire(t0 + Duration::from_millis(1_100));
        assert_eq!(evicted, vec!["k".to_string()]);
        assert!(store.keys().is_empty());
        assert!(store.get("k").is_err());
    }

    #[test]
    fn entries_without_timeout_never_expire() {
        let mut store = CacheStore::new();
        let t0 = Instant::now();
        store.put("k", json!(1), t0);
        assert!(store.expire(t0 + Duration::from_secs(86_400)).is_empty());
        assert!(store.get("k").is_ok());
    }

    #[test]
    fn timeout_survives_clear_and_rewrite() {
        let mut store = CacheStore::new();
        store.set_timeout("k", 10.0).unwrap();
        store.put("k", json!(1), Instant::now());
        assert!(store.clear("k"));
        assert_eq!(store.timeout("k"), Some(10.0));
        store.clear_timeout("k");
        assert_eq!(store.timeout("k"), None);
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let mut store = CacheStore::new();
        assert!(store.set_timeout("k", -1.0).is_err());
        assert!(store.set_timeout("k", f64::NAN).is_err());
        assert_eq!(store.timeout("k"), None);
    }

    // ── LocalCache ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn local_cache_missing_key_is_not_found() {
        let cache = LocalCache::new();
        let err = cache.get("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn local_cache_sweeps_on_access() {
        let cache = LocalCache::new();
        cache.put("k", json!(1)).await.unwrap();
        cache.set_timeout("k", 0.05).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.list().await.unwrap().is_empty());
        assert!(cache.get("k").await.is_err());
    }

    // ── CacheServer ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn server_put_notifies_with_same_key_and_value() {
        let notifier = Arc::new(RecordingNotifier::default());
        let server = CacheServer::new(LocalCache::new(), Some(notifier.clone()));

        server
            .put(Request::new(PutRequest {
                key: "gps".into(),
                value_json: r#"{"latitude": 65.1, "longitude": -147.5}"#.into(),
            }))
            .await
            .unwrap();

        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "gps");
        assert_eq!(sent[0].1, vec![json!({"latitude": 65.1, "longitude": -147.5})]);
    }

    #[tokio::test]
    async fn server_put_succeeds_when_notification_fails() {
        let server = CacheServer::new(LocalCache::new(), Some(Arc::new(FailingNotifier)));
        let reply = server
            .put(Request::new(PutRequest {
                key: "k".into(),
                value_json: "42".into(),
            }))
            .await
            .unwrap();
        assert!(reply.into_inner().ok);

        let value = server
            .get(Request::new(KeyRequest { key: "k".into() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(value.value_json, "42");
    }

    #[tokio::test]
    async fn server_rejects_invalid_json() {
        let server = CacheServer::new(LocalCache::new(), None);
        let status = server
            .put(Request::new(PutRequest {
                key: "k".into(),
                value_json: "{not json".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn server_get_missing_is_not_found() {
        let server = CacheServer::new(LocalCache::new(), None);
        let status = server
            .get_age(Request::new(KeyRequest { key: "k".into() }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[test]
    fn apply_timeouts_sets_every_key() {
        let server = CacheServer::new(LocalCache::new(), None);
        let timeouts = HashMap::from([("gps".to_string(), 600.0), ("pdu1".to_string(), 120.0)]);
        server.apply_timeouts(&timeouts).unwrap();
        server.cache.with_store(|store, _| {
            assert_eq!(store.timeout("gps"), Some(600.0));
            assert_eq!(store.timeout("pdu1"), Some(120.0));
        });
    }
}
