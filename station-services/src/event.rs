/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Publish/subscribe event service.
//!
//! ```text
//!  register/unregister ──► SubscriptionTable ──► events file (rewritten)
//!
//!  notify(event, args) ──► one DeliveryTask per observer ──► queue
//!                                                             │
//!                                 single delivery worker ◄────┘
//!                                        │
//!                                        ▼
//!                      Subscriber.Deliver on the observer URL
//! ```
//!
//! `notify` only enqueues and returns.  The worker drains the queue in
//! order, so a subscriber sees its deliveries in enqueue order.  A failed
//! delivery is logged and dropped; it is never retried and never holds up
//! the rest of the queue beyond the per-call RPC timeout.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use crate::client::connect_lazy;
use crate::error::{ClientError, ServiceError};
use crate::proto::station_v1::event_service_server::EventService;
use crate::proto::station_v1::subscriber_client::SubscriberClient;
use crate::proto::station_v1::subscriber_server::Subscriber;
use crate::proto::station_v1::{
    Ack, Delivery, Empty, EventList, EventName, NotifyRequest, Observer, ObserverList,
    Subscription,
};

// ── SubscriptionTable ─────────────────────────────────────────────────────────

/// Event name → observers, in registration order.
///
/// On disk the table is one `event url method` record per line.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SubscriptionTable {
    events: BTreeMap<String, Vec<Observer>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the table from `path`.  A missing file is an empty table;
    /// malformed lines are skipped.
    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no subscription table yet, starting empty");
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(ServiceError::Persist {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let table = Self::parse(&content, path);
        info!(
            path = %path.display(),
            events = table.events.len(),
            "loaded subscription table"
        );
        Ok(table)
    }

    fn parse(content: &str, path: &Path) -> Self {
        let mut table = Self::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [event, url, method] => {
                    table.add(event, url, method);
                }
                _ => warn!(
                    path = %path.display(),
                    line = index + 1,
                    "skipping malformed subscription record"
                ),
            }
        }
        table
    }

    /// Rewrites `path` atomically (temporary file, fsync, rename).
    pub fn save(&self, path: &Path) -> Result<(), ServiceError> {
        let persist = |source| ServiceError::Persist {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = std::fs::File::create(&tmp).map_err(persist)?;
        for (event, observers) in &self.events {
            for observer in observers {
                writeln!(file, "{} {} {}", event, observer.url, observer.method)
                    .map_err(persist)?;
            }
        }
        file.sync_all().map_err(persist)?;
        std::fs::rename(&tmp, path).map_err(persist)?;
        debug!(path = %path.display(), "subscription table saved");
        Ok(())
    }

    /// Adds the triple; returns `false` if it was already present.
    pub fn add(&mut self, event: &str, url: &str, method: &str) -> bool {
        let observers = self.events.entry(event.to_string()).or_default();
        if observers
            .iter()
            .any(|o| o.url == url && o.method == method)
        {
            return false;
        }
        observers.push(Observer {
            url: url.to_string(),
            method: method.to_string(),
        });
        true
    }

    /// Removes the triple; returns `false` if it was not present.  An event
    /// left without observers is dropped from the table.
    pub fn remove(&mut self, event: &str, url: &str, method: &str) -> bool {
        let Some(observers) = self.events.get_mut(event) else {
            return false;
        };
        let before = observers.len();
        observers.retain(|o| !(o.url == url && o.method == method));
        let removed = observers.len() != before;
        if observers.is_empty() {
            self.events.remove(event);
        }
        removed
    }

    /// Drops every observer of `event`; returns `false` if there were none.
    pub fn remove_event(&mut self, event: &str) -> bool {
        self.events.remove(event).is_some()
    }

    pub fn observers(&self, event: &str) -> Option<&[Observer]> {
        self.events.get(event).map(Vec::as_slice)
    }

    /// Event names, sorted.
    pub fn events(&self) -> Vec<String> {
        self.events.keys().cloned().collect()
    }
}

// ── Delivery ──────────────────────────────────────────────────────────────────

/// One pending call of `method` on the subscriber at `url`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryTask {
    pub url: String,
    pub event: String,
    pub method: String,
    pub args_json: Vec<String>,
}

/// Performs one delivery.  The delivery worker owns exactly one transport.
#[tonic::async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, task: &DeliveryTask) -> Result<(), ClientError>;
}

/// Calls `Subscriber.Deliver` on the observer URL.  Channels are kept per
/// URL and connect lazily.
pub struct GrpcDelivery {
    timeout: Duration,
    channels: Mutex<HashMap<String, SubscriberClient<Channel>>>,
}

impl GrpcDelivery {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, url: &str) -> Result<SubscriberClient<Channel>, ClientError> {
        let mut channels = self.channels.lock();
        if let Some(client) = channels.get(url) {
            return Ok(client.clone());
        }
        let client = SubscriberClient::new(connect_lazy(url, self.timeout)?);
        channels.insert(url.to_string(), client.clone());
        Ok(client)
    }
}

#[tonic::async_trait]
impl DeliveryTransport for GrpcDelivery {
    async fn deliver(&self, task: &DeliveryTask) -> Result<(), ClientError> {
        let mut client = self.client_for(&task.url)?;
        client
            .deliver(Delivery {
                event: task.event.clone(),
                method: task.method.clone(),
                args_json: task.args_json.clone(),
            })
            .await?;
        Ok(())
    }
}

/// Spawns the single delivery worker.
///
/// The worker runs until `cancel` fires or every sender is dropped; on
/// cancellation the tasks already queued are still delivered before the
/// worker exits.
pub fn spawn_delivery_worker(
    mut queue: mpsc::UnboundedReceiver<DeliveryTask>,
    transport: Arc<dyn DeliveryTransport>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("event delivery worker started");
        loop {
            let task = tokio::select! {
                _ = cancel.cancelled() => break,
                task = queue.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            deliver_one(transport.as_ref(), &task).await;
        }

        queue.close();
        while let Some(task) = queue.recv().await {
            deliver_one(transport.as_ref(), &task).await;
        }
        info!("event delivery worker stopped");
    })
}

async fn deliver_one(transport: &dyn DeliveryTransport, task: &DeliveryTask) {
    match transport.deliver(task).await {
        Ok(()) => debug!(event = %task.event, url = %task.url, "event delivered"),
        Err(e) => error!(
            event = %task.event,
            url = %task.url,
            method = %task.method,
            error = %e,
            "event delivery failed"
        ),
    }
}

// ── EventServer ───────────────────────────────────────────────────────────────

/// Every field must survive the whitespace-separated table format.
fn validate(sub: &Subscription) -> Result<(), ServiceError> {
    for (field, value) in [("event", &sub.event), ("url", &sub.url), ("method", &sub.method)] {
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(ServiceError::InvalidSubscription {
                field,
                value: value.clone(),
            });
        }
    }
    Ok(())
}

/// gRPC front end of the event service.
///
/// The table lock is never held across an await; the unbounded queue is the
/// only structure shared with the delivery worker.
pub struct EventServer {
    table: Mutex<SubscriptionTable>,
    path: Option<PathBuf>,
    queue: mpsc::UnboundedSender<DeliveryTask>,
}

impl EventServer {
    /// `path` is where the table is persisted after every mutation; `None`
    /// keeps it in memory only.
    pub fn new(
        table: SubscriptionTable,
        path: Option<PathBuf>,
        queue: mpsc::UnboundedSender<DeliveryTask>,
    ) -> Self {
        Self {
            table: Mutex::new(table),
            path,
            queue,
        }
    }

    /// Applies `f` to a copy of the table and keeps the copy only once it is
    /// persisted, so a failed save leaves memory matching the file.
    fn mutate(&self, f: impl FnOnce(&mut SubscriptionTable) -> bool) -> Result<bool, Status> {
        let mut table = self.table.lock();
        let mut next = table.clone();
        if !f(&mut next) {
            return Ok(false);
        }
        if let Some(path) = &self.path {
            next.save(path)?;
        }
        *table = next;
        Ok(true)
    }

    /// Snapshot of the current table.
    pub fn table(&self) -> SubscriptionTable {
        self.table.lock().clone()
    }
}

#[tonic::async_trait]
impl EventService for EventServer {
    async fn register(&self, request: Request<Subscription>) -> Result<Response<Ack>, Status> {
        let sub = request.into_inner();
        validate(&sub)?;
        let added = self.mutate(|table| table.add(&sub.event, &sub.url, &sub.method))?;
        if added {
            info!(event = %sub.event, url = %sub.url, method = %sub.method, "observer registered");
        }
        Ok(Response::new(Ack { ok: true }))
    }

    async fn unregister(&self, request: Request<Subscription>) -> Result<Response<Ack>, Status> {
        let sub = request.into_inner();
        let removed = self.mutate(|table| table.remove(&sub.event, &sub.url, &sub.method))?;
        if removed {
            info!(event = %sub.event, url = %sub.url, method = %sub.method, "observer unregistered");
        }
        Ok(Response::new(Ack { ok: removed }))
    }

    async fn notify(&self, request: Request<NotifyRequest>) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        for arg in &req.args_json {
            serde_json::from_str::<serde_json::Value>(arg)
                .map_err(|e| Status::from(ServiceError::from(e)))?;
        }

        let observers: Vec<Observer> = self
            .table
            .lock()
            .observers(&req.event)
            .map(<[Observer]>::to_vec)
            .unwrap_or_default();

        debug!(event = %req.event, observers = observers.len(), "notify");
        for observer in observers {
            let task = DeliveryTask {
                url: observer.url,
                event: req.event.clone(),
                method: observer.method,
                args_json: req.args_json.clone(),
            };
            if self.queue.send(task).is_err() {
                warn!(event = %req.event, "delivery worker has stopped; dropping notification");
                break;
            }
        }
        Ok(Response::new(Ack { ok: true }))
    }

    async fn list_observers(
        &self,
        request: Request<EventName>,
    ) -> Result<Response<ObserverList>, Status> {
        let event = request.into_inner().event;
        let table = self.table.lock();
        let observers = table
            .observers(&event)
            .ok_or_else(|| ServiceError::EventNotFound(event.clone()))?
            .to_vec();
        Ok(Response::new(ObserverList { observers }))
    }

    async fn list_events(&self, _request: Request<Empty>) -> Result<Response<EventList>, Status> {
        let events = self.table.lock().events();
        Ok(Response::new(EventList { events }))
    }

    async fn remove_event(&self, request: Request<EventName>) -> Result<Response<Ack>, Status> {
        let event = request.into_inner().event;
        let removed = self.mutate(|table| table.remove_event(&event))?;
        if removed {
            info!(event = %event, "event removed");
        }
        Ok(Response::new(Ack { ok: removed }))
    }
}

// ── Subscriber side ───────────────────────────────────────────────────────────

/// A `Subscriber` implementation that forwards every delivery into a
/// channel.  Used by the subscriber simulator and by tests.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    sink: mpsc::UnboundedSender<Delivery>,
}

impl ChannelSubscriber {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (sink, rx) = mpsc::unbounded_channel();
        (Self { sink }, rx)
    }
}

#[tonic::async_trait]
impl Subscriber for ChannelSubscriber {
    async fn deliver(&self, request: Request<Delivery>) -> Result<Response<Ack>, Status> {
        let ok = self.sink.send(request.into_inner()).is_ok();
        Ok(Response::new(Ack { ok }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
