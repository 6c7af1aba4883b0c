/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Control loop against real cache and resource servers.

use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tonic::transport::Server;

use station_monitor::machine::{InstrumentContext, InstrumentState, InstrumentStateMachine, MachineSettings};
use station_monitor::output::{DataWriter, OutputConfig};
use station_monitor::pdu::{CommandSwitch, PduInstrument, Rail, RetryPolicy};
use station_monitor::script::{ScriptConfig, ScriptInstrument};
use station_services::cache::{CacheServer, LocalCache};
use station_services::client::{CacheApi, CacheClient, ResourceClient};
use station_services::config::url_for;
use station_services::proto::station_v1::cache_service_server::CacheServiceServer;
use station_services::proto::station_v1::resource_service_server::ResourceServiceServer;
use station_services::resources::{ClaimRegistry, ResourceServer};

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

struct Services {
    cache: CacheClient,
    resources: ResourceClient,
    registry: ClaimRegistry,
    cancel: CancellationToken,
}

async fn start_services() -> Services {
    let cancel = CancellationToken::new();
    let registry = ClaimRegistry::new();
    let cache_addr = serve(
        Server::builder().add_service(CacheServiceServer::new(CacheServer::new(LocalCache::new(), None))),
        cancel.clone(),
    )
    .await;
    let resource_addr = serve(
        Server::builder().add_service(ResourceServiceServer::new(ResourceServer::new(registry.clone()))),
        cancel.clone(),
    )
    .await;
    Services {
        cache: CacheClient::new(&url_for(cache_addr), TIMEOUT).unwrap(),
        resources: ResourceClient::new(&url_for(resource_addr), TIMEOUT).unwrap(),
        registry,
        cancel,
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap()
}

fn settings(dir: &Path, schedules: &str) -> MachineSettings {
    std::fs::write(dir.join("schedules.yaml"), schedules).unwrap();
    MachineSettings {
        schedule_files: vec![format!("{}/*.yaml", dir.display())],
        sample_flag: Some(dir.join("sample.flag")),
        resources: vec!["camera=on".into(), "heater=on".into()],
        ..MachineSettings::default()
    }
}

#[tokio::test]
async fn script_instrument_claims_samples_and_archives() {
    let services = start_services().await;
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("archive");

    let ctx = InstrumentContext::new(
        "allsky",
        Arc::new(services.cache.clone()),
        Arc::new(services.resources.clone()),
        CancellationToken::new(),
    );
    let instrument = ScriptInstrument::new(ScriptConfig {
        sample: Some(vec!["sh".into(), "-c".into(), "echo frame".into()]),
        ..ScriptConfig::default()
    });
    let writer = DataWriter::new(OutputConfig {
        staging: dir.path().join("staging"),
        path: archive.clone(),
        ..OutputConfig::default()
    })
    .unwrap();
    let mut machine = InstrumentStateMachine::new(
        Box::new(instrument),
        ctx,
        settings(dir.path(), "always:\n  sample.atstart: true\n"),
    )
    .with_writer(writer);

    machine.startup(now()).await.unwrap();
    assert_eq!(machine.state(), InstrumentState::Off);
    assert!(services.registry.snapshot().is_empty());

    assert_eq!(machine.tick(now()).await, InstrumentState::On);
    assert_eq!(
        services.registry.snapshot().get("allsky"),
        Some(&vec!["camera=on".to_string(), "heater=on".to_string()])
    );

    machine.tick(now()).await;
    let files: Vec<_> = std::fs::read_dir(&archive)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name().unwrap(), "data-20250610-120000.dat.gz");

    let mut text = String::new();
    flate2::read::GzDecoder::new(std::fs::File::open(&files[0]).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, "frame\n");

    machine.shutdown().await;
    assert!(services.registry.snapshot().is_empty());
    services.cancel.cancel();
}

#[tokio::test]
async fn powered_pdu_resumes_on_and_publishes_status() {
    let services = start_services().await;
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("pductl.sh");
    std::fs::write(
        &script,
        "case \"$1\" in\n  status) echo '{\"rails\": {\"camera\": \"on\"}}' ;;\n  *) exit 1 ;;\nesac\n",
    )
    .unwrap();

    let rails: Vec<Rail> = serde_yaml::from_str("- {name: camera, label: allsky}\n").unwrap();
    let switch = CommandSwitch::new(
        "sh",
        script.display().to_string(),
        TIMEOUT,
        RetryPolicy {
            max: 0,
            wait: Duration::ZERO,
        },
    );
    let instrument = PduInstrument::new("pdu1", rails, Arc::new(switch), false);
    let ctx = InstrumentContext::new(
        "pdu1",
        Arc::new(services.cache.clone()),
        Arc::new(services.resources.clone()),
        CancellationToken::new(),
    );
    let mut machine = InstrumentStateMachine::new(Box::new(instrument), ctx, settings(dir.path(), "always: {}\n"));

    machine.startup(now()).await.unwrap();
    assert_eq!(machine.state(), InstrumentState::On);
    assert!(services.registry.snapshot().contains_key("pdu1"));

    std::fs::write(dir.path().join("sample.flag"), "").unwrap();
    assert_eq!(machine.tick(now()).await, InstrumentState::On);
    assert!(!dir.path().join("sample.flag").exists());

    let status = services.cache.get("pdu1").await.unwrap();
    assert_eq!(status["rails"]["camera"], "on");
    services.cancel.cancel();
}
