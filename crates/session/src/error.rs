//! Session error types

use attendance::AttendanceError;
use attentiveness::MonitorError;
use camera_capture::CameraError;
use checkpoint_scheduler::CheckpointError;
use event_bus::RoomKey;
use lecture_api::{ApiError, SessionId};
use thiserror::Error;

use crate::state::SessionState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// No capture configuration produced a live stream
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(CameraError),

    /// Ad-hoc capture on a running session failed
    #[error("Capture failed: {0}")]
    Capture(CameraError),

    #[error("Room {0} already has an active lecture")]
    SessionConflict(RoomKey),

    #[error("No live session {0}")]
    UnknownSession(SessionId),

    #[error("Invalid transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Invalid lecture config: {0}")]
    InvalidConfig(String),

    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    #[error("Attendance error: {0}")]
    Attendance(#[from] AttendanceError),

    #[error("Checkpoint scheduler error: {0}")]
    Scheduler(#[from] CheckpointError),

    #[error("Attentiveness monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Session {0} has no pending assessment")]
    NoAssessment(SessionId),

    #[error("Invalid assessment: {0}")]
    InvalidAssessment(String),
}

impl SessionError {
    /// Errors caused by the caller rather than the environment
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SessionError::SessionConflict(_)
                | SessionError::UnknownSession(_)
                | SessionError::InvalidTransition { .. }
                | SessionError::InvalidConfig(_)
                | SessionError::NoAssessment(_)
                | SessionError::InvalidAssessment(_)
        )
    }
}
