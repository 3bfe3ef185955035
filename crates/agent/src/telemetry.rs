//! Logging and metrics setup

use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
    }
}

/// Install the Prometheus recorder and describe agent metrics
pub fn install_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(handle)
}

pub fn register_metrics() {
    describe_counter!(
        "checkpoint_ticks_skipped_total",
        Unit::Count,
        "Checkpoint ticks skipped because a capture was in flight"
    );
    describe_counter!(
        "checkpoints_delivered_total",
        Unit::Count,
        "Attendance checkpoints delivered to the session"
    );
    describe_counter!(
        "attentiveness_samples_total",
        Unit::Count,
        "Attentiveness samples produced"
    );
    describe_counter!(
        "stale_responses_discarded_total",
        Unit::Count,
        "Late responses dropped because their session was no longer active"
    );
    describe_counter!(
        "bus_reconnects_total",
        Unit::Count,
        "Event bus reconnections after the first connection"
    );
}
