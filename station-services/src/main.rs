/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use station_services::config::ServiceConfig;
use station_services::server;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Station coordination service (one service per process).
///
/// Example:
///   station-services --config /etc/station/services.yaml event
#[derive(Debug, Parser)]
#[command(
    name = "station-services",
    about = "Station cache, event, resource and location services",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML service configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configured one.
    #[arg(short = 'l', long = "listen", global = true)]
    listen: Option<SocketAddr>,

    #[command(subcommand)]
    service: Service,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Service {
    /// Key/value cache with per-key expiry.
    Cache,
    /// Publish/subscribe event fan-out.
    Event,
    /// Resource claim registry.
    Resources,
    /// Best-source station location.
    Location,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(service = ?cli.service, config = ?cli.config, listen = ?cli.listen, "starting");

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ServiceConfig::load_from_file(path)?,
        None => {
            warn!("No configuration file provided, using default service settings");
            ServiceConfig::default()
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => error!(error = %e, "cannot listen for interrupt; shutting down"),
        }
        on_signal.cancel();
    });

    let served = match cli.service {
        Service::Cache => {
            let listen = cli.listen.unwrap_or(config.cache.listen);
            server::run_cache(&config, listen, cancel).await
        }
        Service::Event => {
            let listen = cli.listen.unwrap_or(config.event.listen);
            server::run_event(&config, listen, cancel).await
        }
        Service::Resources => {
            let listen = cli.listen.unwrap_or(config.resources.listen);
            server::run_resources(listen, cancel).await
        }
        Service::Location => {
            let listen = cli.listen.unwrap_or(config.location.listen);
            server::run_location(&config, listen, cancel).await
        }
    };
    served.with_context(|| format!("{:?} service failed", cli.service))
}
