/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! subscriber-sim – stands in for an event subscriber.
//!
//! Serves `Subscriber` on `--listen`, logs every delivery and, with
//! `--event`, registers itself for those events on start and unregisters on
//! Ctrl-C.
//!
//! Usage:
//!   subscriber-sim --listen 127.0.0.1:9500 --event camera.done --event weather.*

use std::net::SocketAddr;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tonic::transport::Server;
use tracing::{error, info, warn};

use station_services::client::EventClient;
use station_services::config::{url_for, DEFAULT_EVENT_PORT};
use station_services::event::ChannelSubscriber;
use station_services::proto::station_v1::subscriber_server::SubscriberServer;

#[derive(Debug, Parser)]
#[command(name = "subscriber-sim", about = "Log event deliveries")]
struct Cli {
    /// Address to serve the Subscriber endpoint on.
    #[arg(short, long, default_value = "127.0.0.1:9500")]
    listen: SocketAddr,

    /// Event service URL.
    #[arg(long)]
    event_url: Option<String>,

    /// Event to register for (repeatable).
    #[arg(short, long = "event")]
    events: Vec<String>,

    /// Method name recorded with each registration.
    #[arg(short, long, default_value = "on_event")]
    method: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let own_url = url_for(cli.listen);
    let event_url = cli
        .event_url
        .clone()
        .unwrap_or_else(|| url_for(SocketAddr::from(([127, 0, 0, 1], DEFAULT_EVENT_PORT))));
    let events = EventClient::new(&event_url, Duration::from_secs(5)).context("event service URL")?;

    let (subscriber, mut deliveries) = ChannelSubscriber::new();
    tokio::spawn(async move {
        while let Some(d) = deliveries.recv().await {
            info!(event = %d.event, method = %d.method, args = ?d.args_json, "delivery");
        }
    });

    let server = tokio::spawn(
        Server::builder()
            .add_service(SubscriberServer::new(subscriber))
            .serve_with_shutdown(cli.listen, async {
                let _ = tokio::signal::ctrl_c().await;
            }),
    );
    info!(listen = %cli.listen, "subscriber ready");

    for event in &cli.events {
        events
            .register(event, &own_url, &cli.method)
            .await
            .with_context(|| format!("cannot register for '{}'", event))?;
        info!(event = %event, url = %own_url, "registered");
    }

    server.await.context("subscriber task panicked")?.context("subscriber server failed")?;

    for event in &cli.events {
        if let Err(e) = events.unregister(event, &own_url, &cli.method).await {
            warn!(event = %event, "cannot unregister: {}", e);
        }
    }
    info!("subscriber stopped");
    Ok(())
}
