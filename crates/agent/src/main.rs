//! Classroom Agent - Main Entry Point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use agent::config::{AgentConfig, CameraProviderKind};
use agent::{build_app, spawn_live_tracker, telemetry, AppState};
use anyhow::Context;
use camera_capture::{CaptureProvider, FrameCaptureClient, SnapshotProvider, SyntheticProvider};
use event_bus::{MqttTransport, RealtimeEventBus};
use lecture_api::HttpLectureApi;
use session::SessionController;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_path_from_args();
    let config = AgentConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    telemetry::init_logging(&config.logging)?;
    let metrics = telemetry::install_metrics()?;

    info!("=== Classroom Agent v{} ===", env!("CARGO_PKG_VERSION"));

    let provider: Arc<dyn CaptureProvider> = match config.camera.provider {
        CameraProviderKind::Synthetic => Arc::new(SyntheticProvider::new()),
        CameraProviderKind::Snapshot => Arc::new(SnapshotProvider::new(config.camera.snapshot_dir.clone())),
    };
    let camera = Arc::new(FrameCaptureClient::new(provider, config.camera.capture.clone()));
    let api = Arc::new(HttpLectureApi::new(&config.api)?);
    info!("Lecture backend at {}", config.api.base_url);

    let bus = if config.bus.enabled {
        let transport = Arc::new(MqttTransport::new(config.bus.mqtt.clone()));
        let bus = Arc::new(RealtimeEventBus::new(transport, config.bus.events.clone()));
        if let Err(e) = bus.connect().await {
            // Lectures run without room events until the broker is reachable
            warn!("Event bus unavailable: {}", e);
        }
        Some(bus)
    } else {
        info!("Event bus disabled");
        None
    };

    let controller = SessionController::new(
        camera,
        api,
        bus.clone(),
        config.session.controller_config(),
    );
    let state = Arc::new(AppState::new(controller.clone(), bus.clone()).with_metrics(metrics));
    let tracker = bus
        .as_ref()
        .map(|bus| spawn_live_tracker(bus, Arc::clone(&state.live)));

    let app = build_app(state, &config.server.rate_limit);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("Control API listening on {}", config.server.bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let ended = controller.shutdown().await;
    info!("Ended {} live sessions", ended);
    if let Some(tracker) = tracker {
        tracker.abort();
    }
    if let Some(bus) = bus {
        bus.disconnect().await;
    }
    Ok(())
}

/// `--config <path>` or `--config=<path>`
fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
