/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! stationctl – command-line client for the station services.
//!
//! Usage:
//!   stationctl cache put weather.temp 21.5
//!   stationctl cache get weather.temp
//!   stationctl event notify camera.done '"frame-001"'
//!   stationctl resources list
//!   stationctl location

use std::net::SocketAddr;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::error;

use station_services::client::{
    CacheApi, CacheClient, EventClient, LocationApi, LocationClient, Notifier, ResourceApi,
    ResourceClient,
};
use station_services::config::{
    url_for, DEFAULT_CACHE_PORT, DEFAULT_EVENT_PORT, DEFAULT_LOCATION_PORT, DEFAULT_RESOURCES_PORT,
};

// ── CLI definition ───────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "stationctl", about = "Talk to the station services")]
struct Cli {
    /// Cache service URL.
    #[arg(long, global = true)]
    cache_url: Option<String>,

    /// Event service URL.
    #[arg(long, global = true)]
    event_url: Option<String>,

    /// Resource service URL.
    #[arg(long, global = true)]
    resources_url: Option<String>,

    /// Location service URL.
    #[arg(long, global = true)]
    location_url: Option<String>,

    /// Per-call timeout in seconds.
    #[arg(long, global = true, default_value_t = 5.0)]
    timeout: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Key/value cache operations.
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Event subscriptions and notifications.
    #[command(subcommand)]
    Event(EventCommand),
    /// Resource claims.
    #[command(subcommand)]
    Resources(ResourceCommand),
    /// Print the best known station position.
    Location,
}

#[derive(Debug, Subcommand)]
enum CacheCommand {
    Get { key: String },
    /// Print the value, or `default` when the key is absent.
    GetOr { key: String, default: String },
    /// Seconds since the key was last written.
    Age { key: String },
    /// VALUE is parsed as JSON; anything else is stored as a string.
    Put { key: String, value: String },
    List,
    Clear { key: String },
    SetTimeout { key: String, seconds: f64 },
    GetTimeout { key: String },
    ClearTimeout { key: String },
}

#[derive(Debug, Subcommand)]
enum EventCommand {
    Register { event: String, url: String, method: String },
    Unregister { event: String, url: String, method: String },
    /// Each ARG is parsed as JSON; anything else is sent as a string.
    Notify { event: String, args: Vec<String> },
    Events,
    Observers { event: String },
    Remove { event: String },
}

#[derive(Debug, Subcommand)]
enum ResourceCommand {
    /// Replace the claim set of INSTRUMENT.  No resources releases all.
    Allocate { instrument: String, resources: Vec<String> },
    List,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn loopback(port: u16) -> String {
    url_for(SocketAddr::from(([127, 0, 0, 1], port)))
}

fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

async fn run(cli: Cli) -> Result<()> {
    if !cli.timeout.is_finite() || cli.timeout <= 0.0 {
        anyhow::bail!("timeout must be a positive number of seconds");
    }
    let timeout = Duration::from_secs_f64(cli.timeout);

    match cli.command {
        Command::Cache(cmd) => {
            let url = cli.cache_url.unwrap_or_else(|| loopback(DEFAULT_CACHE_PORT));
            let cache = CacheClient::new(&url, timeout).context("cache service URL")?;
            run_cache(&cache, cmd).await
        }
        Command::Event(cmd) => {
            let url = cli.event_url.unwrap_or_else(|| loopback(DEFAULT_EVENT_PORT));
            let events = EventClient::new(&url, timeout).context("event service URL")?;
            run_event(&events, cmd).await
        }
        Command::Resources(cmd) => {
            let url = cli.resources_url.unwrap_or_else(|| loopback(DEFAULT_RESOURCES_PORT));
            let resources = ResourceClient::new(&url, timeout).context("resource service URL")?;
            match cmd {
                ResourceCommand::Allocate {
                    instrument,
                    resources: claims,
                } => resources.allocate(&instrument, claims).await?,
                ResourceCommand::List => {
                    for (instrument, claims) in resources.list().await? {
                        println!("{}: {}", instrument, claims.join(", "));
                    }
                }
            }
            Ok(())
        }
        Command::Location => {
            let url = cli.location_url.unwrap_or_else(|| loopback(DEFAULT_LOCATION_PORT));
            let location = LocationClient::new(&url, timeout).context("location service URL")?;
            match location.best().await? {
                Some(fix) => println!("{} {} ({})", fix.latitude, fix.longitude, fix.src),
                None => println!("no fix"),
            }
            Ok(())
        }
    }
}

async fn run_cache(cache: &CacheClient, cmd: CacheCommand) -> Result<()> {
    match cmd {
        CacheCommand::Get { key } => println!("{}", cache.get(&key).await?),
        CacheCommand::GetOr { key, default } => {
            println!("{}", cache.get_or_default(&key, parse_value(&default)).await?)
        }
        CacheCommand::Age { key } => println!("{:.3}", cache.get_age(&key).await?),
        CacheCommand::Put { key, value } => cache.put(&key, parse_value(&value)).await?,
        CacheCommand::List => {
            for key in cache.list().await? {
                println!("{}", key);
            }
        }
        CacheCommand::Clear { key } => cache.clear(&key).await?,
        CacheCommand::SetTimeout { key, seconds } => cache.set_timeout(&key, seconds).await?,
        CacheCommand::GetTimeout { key } => match cache.get_timeout(&key).await? {
            Some(seconds) => println!("{}", seconds),
            None => println!("none"),
        },
        CacheCommand::ClearTimeout { key } => cache.clear_timeout(&key).await?,
    }
    Ok(())
}

async fn run_event(events: &EventClient, cmd: EventCommand) -> Result<()> {
    match cmd {
        EventCommand::Register { event, url, method } => {
            events.register(&event, &url, &method).await?
        }
        EventCommand::Unregister { event, url, method } => {
            events.unregister(&event, &url, &method).await?
        }
        EventCommand::Notify { event, args } => {
            let args = args.iter().map(|a| parse_value(a)).collect();
            events.notify(&event, args).await?
        }
        EventCommand::Events => {
            for event in events.list_events().await? {
                println!("{}", event);
            }
        }
        EventCommand::Observers { event } => {
            for observer in events.list_observers(&event).await? {
                println!("{} {}", observer.url, observer.method);
            }
        }
        EventCommand::Remove { event } => events.remove_event(&event).await?,
    }
    Ok(())
}
