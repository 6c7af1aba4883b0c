/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use station_monitor::cadence::{CadenceSelector, CadenceSource};
use station_monitor::config::{CadenceKind, InstrumentSetup, MonitorConfig, WindowKind};
use station_monitor::machine::{Instrument, InstrumentContext, InstrumentStateMachine};
use station_monitor::output::DataWriter;
use station_monitor::pdu::{CommandSwitch, PduInstrument};
use station_monitor::script::ScriptInstrument;
use station_monitor::solar::{NoaaEphemeris, SolarEphemeris};
use station_monitor::window::{NightWindow, PeriodicWindow, PowerWindow, SolarWindow, WindowPredicate};
use station_services::client::{CacheApi, CacheClient, LocationApi, LocationClient, ResourceClient};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Runs one instrument's scheduling state machine.
///
/// Example:
///   station-monitor --config /etc/station/allsky.yaml
#[derive(Debug, Parser)]
#[command(
    name = "station-monitor",
    about = "Schedule-driven instrument control loop",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML monitor configuration file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,
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

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = MonitorConfig::load_from_file(&cli.config)?;
    let timeout = config.services.rpc_timeout;

    let cache: Arc<dyn CacheApi> = Arc::new(
        CacheClient::new(&config.services.cache, timeout).context("cache service URL")?,
    );
    let location: Arc<dyn LocationApi> = Arc::new(
        LocationClient::new(&config.services.location, timeout).context("location service URL")?,
    );
    let arbiter = Arc::new(
        ResourceClient::new(&config.services.resources, timeout).context("resource service URL")?,
    );
    let ephemeris: Arc<dyn SolarEphemeris> = Arc::new(NoaaEphemeris);

    let window: Box<dyn WindowPredicate> = match config.window {
        WindowKind::Periodic => Box::new(PeriodicWindow),
        WindowKind::Solar => Box::new(SolarWindow::new(location.clone(), ephemeris.clone())),
        WindowKind::Night => Box::new(NightWindow::new(location.clone(), ephemeris.clone())),
        WindowKind::Power => Box::new(PowerWindow::new(cache.clone())),
    };
    let cadence = CadenceSelector::new(match config.cadence {
        CadenceKind::Fixed => CadenceSource::Fixed,
        CadenceKind::DayNight => CadenceSource::DayNight {
            location: location.clone(),
            ephemeris: ephemeris.clone(),
        },
        CadenceKind::Power => CadenceSource::Power {
            cache: cache.clone(),
        },
    });

    let instrument: Box<dyn Instrument> = match config.instrument {
        InstrumentSetup::Script(script) => Box::new(ScriptInstrument::new(script)),
        InstrumentSetup::Pdu(pdu) => {
            let switch = CommandSwitch::new(pdu.program, pdu.unit.clone(), pdu.timeout, pdu.retry);
            Box::new(PduInstrument::new(pdu.unit, pdu.rails, Arc::new(switch), pdu.control))
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

    let ctx = InstrumentContext::new(config.name.clone(), cache, arbiter, cancel);
    let mut machine = InstrumentStateMachine::new(instrument, ctx, config.machine)
        .with_window(window)
        .with_cadence(cadence);
    if let Some(output) = config.output {
        let writer = DataWriter::new(output).context("output configuration")?;
        machine = machine.with_writer(writer);
    }

    machine.run().await;
    Ok(())
}
