//! Attendance Checkpoint Scheduler
//!
//! Periodically captures the classroom camera and submits the frame for
//! background recognition:
//! - One test checkpoint shortly after start, surfaced to the operator
//! - Interval checkpoints with gapless numbering per session
//! - Overlapping ticks skipped while a capture is in flight

mod scheduler;

pub use scheduler::{
    CheckpointScheduler, CheckpointSink, SchedulerConfig, TestCheckpointResult, TestResultSink,
};

use camera_capture::CameraError;
use lecture_api::ApiError;
use thiserror::Error;

/// Checkpoint failure types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckpointError {
    #[error("Camera frame not ready")]
    FrameNotReady,

    #[error("Capture failed: {0}")]
    Camera(#[from] CameraError),

    #[error("Recognition request failed: {0}")]
    Api(#[from] ApiError),

    #[error("Another checkpoint is still in flight")]
    Busy,

    #[error("Scheduler already running for session {0}")]
    AlreadyRunning(i64),
}
