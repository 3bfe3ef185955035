//! Classroom Agent
//!
//! REST control surface over the live-lecture session engine.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use event_bus::{LiveLectures, RealtimeEventBus};
pub use event_bus::spawn_live_tracker;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use session::SessionController;
use tower_governor::GovernorLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub mod config;
mod error;
pub mod rate_limit;
mod routes;
pub mod telemetry;

pub use error::AppError;

use crate::rate_limit::{create_governor_config, DefaultGovernorConfig, RateLimitConfig};

/// Application state shared across handlers
pub struct AppState {
    pub controller: SessionController,
    pub bus: Option<Arc<RealtimeEventBus>>,
    /// Lectures announced in joined rooms
    pub live: Arc<Mutex<LiveLectures>>,
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(controller: SessionController, bus: Option<Arc<RealtimeEventBus>>) -> Self {
        Self {
            controller,
            bus,
            live: Arc::new(Mutex::new(LiveLectures::new())),
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub(crate) fn live(&self) -> MutexGuard<'_, LiveLectures> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    /// `disabled`, `connected` or `disconnected`
    pub bus: String,
    pub live_sessions: usize,
    pub bus_connections: u64,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    router(state, None)
}

/// Router with request tracing and, when enabled, per-peer rate limiting
/// on the control routes
pub fn build_app(state: Arc<AppState>, rate_limit: &RateLimitConfig) -> Router {
    let governor = if rate_limit.enabled {
        let config = create_governor_config(rate_limit);
        if config.is_none() {
            warn!("Rate limit disabled: invalid quota {:?}", rate_limit);
        }
        config
    } else {
        None
    };
    router(state, governor).layer(TraceLayer::new_for_http())
}

fn router(state: Arc<AppState>, governor: Option<Arc<DefaultGovernorConfig>>) -> Router {
    let control = Router::new()
        .route("/api/v1/lectures/start", post(routes::lectures::start))
        .route("/api/v1/lectures/end", post(routes::lectures::end))
        .route("/api/v1/lectures/:id/override", post(routes::lectures::override_attendance))
        .route("/api/v1/lectures/:id/recognize", post(routes::lectures::recognize))
        .route("/api/v1/lectures/:id/assessment", post(routes::assessment::attach))
        .route(
            "/api/v1/lectures/:id/assessment/submit",
            post(routes::assessment::submit),
        );
    let control = match governor {
        Some(config) => control.layer(GovernorLayer { config }),
        None => control,
    };

    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/lectures/current", get(routes::lectures::current))
        .route("/api/v1/lectures/live", get(routes::lectures::live))
        .route("/api/v1/lectures/:id", get(routes::lectures::get_lecture))
        .route("/api/v1/lectures/:id/attendance", get(routes::lectures::attendance))
        .route("/api/v1/events/recent", get(routes::events::recent))
        .route("/metrics", get(metrics_handler))
        .merge(control)
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let bus = match &state.bus {
        None => "disabled",
        Some(bus) if bus.is_connected() => "connected",
        Some(_) => "disconnected",
    };
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus {
            bus: bus.to_string(),
            live_sessions: state.controller.current().len(),
            bus_connections: state.bus.as_ref().map(|b| b.connection_count()).unwrap_or(0),
        },
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

