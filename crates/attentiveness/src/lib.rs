//! Attentiveness Monitoring
//!
//! Samples the shared classroom camera on its own timer, asks the backend
//! for an emotion/attentiveness classification and compiles a per-student
//! report when the lecture ends.

mod config;
mod monitor;
mod report;

pub use config::MonitorConfig;
pub use monitor::{AttentivenessMonitor, SampleSink};
pub use report::{AttentivenessSample, SessionReport, StudentAttentiveness};

use lecture_api::SessionId;
use thiserror::Error;

/// Monitor error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Monitor already running for session {0}")]
    AlreadyRunning(SessionId),

    #[error("Invalid monitor configuration: {0}")]
    InvalidConfig(String),
}
