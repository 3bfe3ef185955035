//! Per-session state, discarded when the session completes

use std::sync::Arc;

use attendance::{AttendanceError, Checkpoint, RecognitionResultAggregator};
use attentiveness::AttentivenessMonitor;
use camera_capture::StreamLease;
use checkpoint_scheduler::{CheckpointScheduler, TestCheckpointResult};
use periodic_task::PeriodicTask;

use crate::assessment::Assessment;
use crate::events::SessionEvent;
use crate::state::{LectureSession, SessionState};

pub(crate) struct SessionStore {
    pub session: LectureSession,
    /// Sole owner of the camera stream
    pub lease: StreamLease,
    /// Taken at end for finalization
    pub aggregator: Option<RecognitionResultAggregator>,
    pub scheduler: Arc<CheckpointScheduler>,
    pub monitor: Arc<AttentivenessMonitor>,
    pub checkpoints: Vec<Checkpoint>,
    pub test_result: Option<TestCheckpointResult>,
    pub assessment: Option<Assessment>,
    pub assessment_timer: Option<PeriodicTask>,
}

impl SessionStore {
    pub fn new(
        session: LectureSession,
        lease: StreamLease,
        aggregator: RecognitionResultAggregator,
        scheduler: Arc<CheckpointScheduler>,
        monitor: Arc<AttentivenessMonitor>,
    ) -> Self {
        Self {
            session,
            lease,
            aggregator: Some(aggregator),
            scheduler,
            monitor,
            checkpoints: Vec::new(),
            test_result: None,
            assessment: None,
            assessment_timer: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.state == SessionState::Active
    }

    /// Occupies its room until the lecture ends
    pub fn holds_room(&self) -> bool {
        matches!(self.session.state, SessionState::Setup | SessionState::Active)
    }

    pub fn record_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<SessionEvent, AttendanceError> {
        let aggregator = self
            .aggregator
            .as_mut()
            .ok_or(AttendanceError::Finalized(self.session.id))?;
        let accepted = aggregator.record(&checkpoint)?;
        let event = SessionEvent::CheckpointRecorded {
            session_id: self.session.id,
            checkpoint_number: checkpoint.checkpoint_number,
            is_test: checkpoint.is_test,
            accepted,
        };
        self.checkpoints.push(checkpoint);
        Ok(event)
    }

    pub fn last_checkpoint_number(&self) -> u32 {
        self.checkpoints
            .iter()
            .map(|c| c.checkpoint_number)
            .max()
            .unwrap_or(0)
    }

    /// Cancel both loops and release the camera. Synchronous.
    pub fn stop_capture(&self) -> bool {
        self.scheduler.stop();
        self.monitor.stop();
        self.lease.release()
    }
}
