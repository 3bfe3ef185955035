//! Realtime Event Bus
//!
//! Room-scoped publish/subscribe for lecture lifecycle events:
//! - Persistent MQTT connection with exponential backoff and endpoint fallback
//! - Room membership replayed after every reconnect (clean sessions)
//! - Bounded recent-event list and a deduplicating live-lecture view
//! - In-process loopback transport for tests and offline runs

mod bus;
mod event;
mod live;
mod room;
mod transport;

pub use bus::{BusConfig, RealtimeEventBus};
pub use event::{EventType, LecturePayload, RealtimeEvent};
pub use live::{spawn_live_tracker, LiveLecture, LiveLectures};
pub use room::RoomKey;
pub use transport::{
    Backoff, LoopbackBroker, LoopbackTransport, MqttConfig, MqttTransport, Transport,
    TransportEvent,
};

use thiserror::Error;

/// Event bus error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
