//! Operator-facing session events

use std::sync::Arc;

use checkpoint_scheduler::TestCheckpointResult;
use lecture_api::SessionId;

use crate::assessment::AssessmentResult;
use crate::state::SessionState;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
    },
    /// The startup checkpoint finished or failed
    TestCheckpoint {
        session_id: SessionId,
        result: TestCheckpointResult,
    },
    CheckpointRecorded {
        session_id: SessionId,
        checkpoint_number: u32,
        is_test: bool,
        /// Recognitions accepted by the aggregator
        accepted: usize,
    },
    /// A late response for a session that is no longer active
    StaleDiscarded {
        session_id: SessionId,
        source: &'static str,
    },
    SoftFailure {
        session_id: SessionId,
        operation: &'static str,
        error: String,
    },
    AssessmentFinished {
        session_id: SessionId,
        result: AssessmentResult,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::StateChanged { session_id, .. }
            | SessionEvent::TestCheckpoint { session_id, .. }
            | SessionEvent::CheckpointRecorded { session_id, .. }
            | SessionEvent::StaleDiscarded { session_id, .. }
            | SessionEvent::SoftFailure { session_id, .. }
            | SessionEvent::AssessmentFinished { session_id, .. } => *session_id,
        }
    }
}

/// Called synchronously for every event, never under a controller lock
pub type SessionObserver = Arc<dyn Fn(&SessionEvent) + Send + Sync>;
