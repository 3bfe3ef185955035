//! Live lecture view merged from realtime events

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::RealtimeEventBus;
use crate::event::{EventType, RealtimeEvent};
use crate::room::RoomKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveLecture {
    pub id: i64,
    pub room: RoomKey,
    pub title: Option<String>,
    pub subject: Option<String>,
    /// Set for announced lectures that have not started
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started: bool,
    pub updated_at: DateTime<Utc>,
}

/// Lectures keyed by id. Redelivered events never duplicate an entry.
#[derive(Debug, Clone, Default)]
pub struct LiveLectures {
    lectures: BTreeMap<i64, LiveLecture>,
}

impl LiveLectures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one event. Returns true if the view changed.
    pub fn apply(&mut self, event: &RealtimeEvent) -> bool {
        let id = event.lecture_id();
        match event.event_type {
            EventType::LectureEnded => self.lectures.remove(&id).is_some(),
            EventType::LectureStarted | EventType::LectureScheduled => {
                let started = event.event_type == EventType::LectureStarted;
                let entry = LiveLecture {
                    id,
                    room: event.room.clone(),
                    title: event.payload.title.clone(),
                    subject: event.payload.subject.clone(),
                    scheduled_for: event.payload.scheduled_for,
                    started,
                    updated_at: event.timestamp,
                };

                match self.lectures.get_mut(&id) {
                    // A late "scheduled" never demotes a started lecture
                    Some(existing) if existing.started && !started => false,
                    Some(existing) => {
                        let changed = existing.started != entry.started
                            || existing.title != entry.title
                            || existing.subject != entry.subject
                            || existing.scheduled_for != entry.scheduled_for;
                        *existing = entry;
                        changed
                    }
                    None => {
                        self.lectures.insert(id, entry);
                        true
                    }
                }
            }
        }
    }

    pub fn get(&self, id: i64) -> Option<&LiveLecture> {
        self.lectures.get(&id)
    }

    pub fn list(&self) -> Vec<LiveLecture> {
        self.lectures.values().cloned().collect()
    }

    /// Started lectures only
    pub fn live(&self) -> Vec<LiveLecture> {
        self.lectures.values().filter(|l| l.started).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lectures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lectures.is_empty()
    }
}

/// Feed inbound room events into a shared live-lecture view
pub fn spawn_live_tracker(bus: &RealtimeEventBus, live: Arc<Mutex<LiveLectures>>) -> JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let changed = live
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .apply(&event);
                    if changed {
                        debug!("Live lectures updated by {:?} {}", event.event_type, event.lecture_id());
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Live tracker missed {} events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
