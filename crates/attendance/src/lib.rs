//! Lecture Attendance
//!
//! Turns checkpoint recognition results into one attendance record per
//! rostered student:
//! - OR over checkpoints (seen once means present)
//! - Confidence threshold and unknown-face filtering
//! - Teacher overrides
//! - Per-checkpoint presence summary

mod aggregator;
mod checkpoint;

pub use aggregator::{
    AggregatorConfig, AttendanceRecord, AttendanceSummary, RecognitionResultAggregator,
    StudentSummary,
};
pub use checkpoint::{normalize_name, Checkpoint};

use lecture_api::SessionId;
use thiserror::Error;

/// Attendance error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttendanceError {
    #[error("Checkpoint belongs to session {got}, aggregator tracks {expected}")]
    SessionMismatch { expected: SessionId, got: SessionId },

    #[error("Attendance for session {0} is already finalized")]
    Finalized(SessionId),

    #[error("Student {0} is not on the roster")]
    NotRostered(i64),

    #[error("Attendance can only be overridden to Present or Absent, got {0}")]
    InvalidOverride(&'static str),
}
