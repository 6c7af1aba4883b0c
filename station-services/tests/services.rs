/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! End-to-end tests over real gRPC servers on ephemeral ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tonic::transport::Server;

use station_services::cache::{CacheServer, LocalCache};
use station_services::client::{
    CacheApi, CacheClient, EventClient, LocationApi, LocationClient, ResourceApi, ResourceClient,
};
use station_services::config::url_for;
use station_services::event::{
    spawn_delivery_worker, ChannelSubscriber, EventServer, GrpcDelivery, SubscriptionTable,
};
use station_services::location::{default_sources, LocationServer, Locator};
use station_services::proto::station_v1::cache_service_server::CacheServiceServer;
use station_services::proto::station_v1::event_service_server::EventServiceServer;
use station_services::proto::station_v1::location_service_server::LocationServiceServer;
use station_services::proto::station_v1::subscriber_server::SubscriberServer;
use station_services::server::build_resources;

const TIMEOUT: Duration = Duration::from_secs(2);

async fn serve(router: Router, cancel: CancellationToken) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        router
            .serve_with_incoming_shutdown(
                tokio_stream::wrappers::TcpListenerStream::new(listener),
                async move { cancel.cancelled().await },
            )
            .await
            .unwrap();
    });
    addr
}

async fn start_event_service(cancel: &CancellationToken) -> SocketAddr {
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    spawn_delivery_worker(queue_rx, Arc::new(GrpcDelivery::new(TIMEOUT)), cancel.clone());
    let server = EventServer::new(SubscriptionTable::new(), None, queue_tx);
    serve(
        Server::builder().add_service(EventServiceServer::new(server)),
        cancel.clone(),
    )
    .await
}

#[tokio::test]
async fn cache_put_is_delivered_to_subscriber() {
    let cancel = CancellationToken::new();

    let event_addr = start_event_service(&cancel).await;
    let events = EventClient::new(&url_for(event_addr), TIMEOUT).unwrap();

    let (subscriber, mut deliveries) = ChannelSubscriber::new();
    let subscriber_addr = serve(
        Server::builder().add_service(SubscriberServer::new(subscriber)),
        cancel.clone(),
    )
    .await;

    let cache_server = CacheServer::new(LocalCache::new(), Some(Arc::new(events.clone())));
    let cache_addr = serve(
        Server::builder().add_service(CacheServiceServer::new(cache_server)),
        cancel.clone(),
    )
    .await;
    let cache = CacheClient::new(&url_for(cache_addr), TIMEOUT).unwrap();

    events
        .register("power", &url_for(subscriber_addr), "on_power")
        .await
        .unwrap();
    // An unreachable observer on the same event must not block delivery.
    events
        .register("power", "http://127.0.0.1:9", "on_power")
        .await
        .unwrap();

    cache.put("power", json!({"watts": 31.5})).await.unwrap();
    assert_eq!(cache.get("power").await.unwrap(), json!({"watts": 31.5}));
    assert!(cache.get_age("power").await.unwrap() < 1.0);

    let delivery = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.event, "power");
    assert_eq!(delivery.method, "on_power");
    assert_eq!(delivery.args_json, vec![json!({"watts": 31.5}).to_string()]);

    cancel.cancel();
}

#[tokio::test]
async fn cache_client_reports_missing_key_and_timeouts() {
    let cancel = CancellationToken::new();
    let addr = serve(
        Server::builder().add_service(CacheServiceServer::new(CacheServer::new(
            LocalCache::new(),
            None,
        ))),
        cancel.clone(),
    )
    .await;
    let cache = CacheClient::new(&url_for(addr), TIMEOUT).unwrap();

    let err = cache.get("missing").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(
        cache.get_or_default("missing", json!(7)).await.unwrap(),
        json!(7)
    );

    cache.set_timeout("gps", 1.0).await.unwrap();
    assert_eq!(cache.get_timeout("gps").await.unwrap(), Some(1.0));
    cache.put("gps", json!({"mode": 3})).await.unwrap();
    assert_eq!(cache.list().await.unwrap(), vec!["gps".to_string()]);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(cache.list().await.unwrap().is_empty());
    assert!(cache.get("gps").await.unwrap_err().is_not_found());

    cache.clear_timeout("gps").await.unwrap();
    assert_eq!(cache.get_timeout("gps").await.unwrap(), None);

    cancel.cancel();
}

#[tokio::test]
async fn event_registration_is_idempotent_over_rpc() {
    let cancel = CancellationToken::new();
    let addr = start_event_service(&cancel).await;
    let events = EventClient::new(&url_for(addr), TIMEOUT).unwrap();

    events.register("e", "http://127.0.0.1:9", "m").await.unwrap();
    events.register("e", "http://127.0.0.1:9", "m").await.unwrap();
    assert_eq!(events.list_observers("e").await.unwrap().len(), 1);
    assert_eq!(events.list_events().await.unwrap(), vec!["e".to_string()]);

    events.remove_event("e").await.unwrap();
    assert!(events.list_observers("e").await.unwrap_err().is_not_found());

    cancel.cancel();
}

#[tokio::test]
async fn resources_and_location_round_trip() {
    let cancel = CancellationToken::new();

    let resources_addr = serve(Server::builder().add_service(build_resources()), cancel.clone()).await;
    let resources = ResourceClient::new(&url_for(resources_addr), TIMEOUT).unwrap();
    resources
        .allocate("cam1", vec!["camera1=on".into()])
        .await
        .unwrap();
    resources
        .allocate("pdu", vec!["rail2=on".into()])
        .await
        .unwrap();
    resources.allocate("pdu", Vec::new()).await.unwrap();
    let claims = resources.list().await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims["cam1"], vec!["camera1=on".to_string()]);

    let cache = LocalCache::new();
    cache
        .put("iridium", json!({"latitude": 69.3, "longitude": -133.0}))
        .await
        .unwrap();
    let locator = Locator::new(Arc::new(cache), default_sources());
    let location_addr = serve(
        Server::builder().add_service(LocationServiceServer::new(LocationServer::new(locator))),
        cancel.clone(),
    )
    .await;
    let location = LocationClient::new(&url_for(location_addr), TIMEOUT).unwrap();
    let fix = location.best().await.unwrap().unwrap();
    assert_eq!(fix.src, "iridium");
    assert_eq!(fix.latitude, 69.3);

    cancel.cancel();
}
