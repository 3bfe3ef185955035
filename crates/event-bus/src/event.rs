//! Realtime event envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::room::RoomKey;
use crate::BusError;

/// Lifecycle event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LectureStarted,
    LectureScheduled,
    LectureEnded,
}

/// Lecture described by an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LecturePayload {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Wire message: `{type, room, payload, timestamp}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub room: RoomKey,
    pub payload: LecturePayload,
    pub timestamp: DateTime<Utc>,
}

impl RealtimeEvent {
    pub fn lecture_started(room: RoomKey, id: i64, title: &str, subject: &str) -> Self {
        Self::new(
            EventType::LectureStarted,
            room,
            LecturePayload {
                id,
                title: Some(title.to_string()),
                subject: Some(subject.to_string()),
                scheduled_for: None,
            },
        )
    }

    pub fn lecture_scheduled(
        room: RoomKey,
        id: i64,
        title: &str,
        subject: &str,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self::new(
            EventType::LectureScheduled,
            room,
            LecturePayload {
                id,
                title: Some(title.to_string()),
                subject: Some(subject.to_string()),
                scheduled_for: Some(scheduled_for),
            },
        )
    }

    pub fn lecture_ended(room: RoomKey, id: i64) -> Self {
        Self::new(
            EventType::LectureEnded,
            room,
            LecturePayload {
                id,
                title: None,
                subject: None,
                scheduled_for: None,
            },
        )
    }

    fn new(event_type: EventType, room: RoomKey, payload: LecturePayload) -> Self {
        Self {
            event_type,
            room,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn lecture_id(&self) -> i64 {
        self.payload.id
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(self).map_err(|e| BusError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        serde_json::from_slice(bytes).map_err(|e| BusError::Serialization(e.to_string()))
    }
}
