//! Session state machine

use chrono::{DateTime, Utc};
use event_bus::RoomKey;
use lecture_api::SessionId;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Lifecycle state. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Setup,
    Active,
    /// Lecture over, assessment running
    Test,
    Completed,
}

impl SessionState {
    pub fn can_transition(self, to: SessionState) -> bool {
        matches!(
            (self, to),
            (SessionState::Setup, SessionState::Active)
                | (SessionState::Active, SessionState::Test)
                | (SessionState::Active, SessionState::Completed)
                | (SessionState::Test, SessionState::Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Completed
    }
}

/// Parameters of a lecture to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LectureConfig {
    pub class_id: String,
    #[serde(default)]
    pub section_id: String,
    pub subject: String,
    #[serde(alias = "chapter")]
    pub title: String,
    #[serde(default = "default_interval")]
    pub checkpoint_interval_seconds: u64,
}

fn default_interval() -> u64 {
    300
}

impl LectureConfig {
    pub fn new(class_id: &str, section_id: &str, subject: &str, title: &str) -> Self {
        Self {
            class_id: class_id.to_string(),
            section_id: section_id.to_string(),
            subject: subject.to_string(),
            title: title.to_string(),
            checkpoint_interval_seconds: default_interval(),
        }
    }

    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.checkpoint_interval_seconds = seconds;
        self
    }

    pub fn room(&self) -> RoomKey {
        RoomKey::new(&self.class_id, Some(&self.section_id))
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.class_id.trim().is_empty() {
            return Err(SessionError::InvalidConfig("class_id is empty".to_string()));
        }
        if self.subject.trim().is_empty() {
            return Err(SessionError::InvalidConfig("subject is empty".to_string()));
        }
        if self.checkpoint_interval_seconds == 0 {
            return Err(SessionError::InvalidConfig(
                "checkpoint interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A lecture as tracked by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LectureSession {
    pub id: SessionId,
    pub class_id: String,
    pub section_id: String,
    pub subject: String,
    pub title: String,
    pub state: SessionState,
    pub checkpoint_interval_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl LectureSession {
    pub fn new(id: SessionId, config: &LectureConfig) -> Self {
        Self {
            id,
            class_id: config.class_id.clone(),
            section_id: config.section_id.clone(),
            subject: config.subject.clone(),
            title: config.title.clone(),
            state: SessionState::Setup,
            checkpoint_interval_seconds: config.checkpoint_interval_seconds,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn room(&self) -> RoomKey {
        RoomKey::new(&self.class_id, Some(&self.section_id))
    }

    /// Move to `to`, returning the previous state
    pub fn transition(&mut self, to: SessionState) -> Result<SessionState, SessionError> {
        let from = self.state;
        if !from.can_transition(to) {
            return Err(SessionError::InvalidTransition { from, to });
        }
        self.state = to;
        if self.ended_at.is_none() && matches!(to, SessionState::Test | SessionState::Completed) {
            self.ended_at = Some(Utc::now());
        }
        Ok(from)
    }
}
