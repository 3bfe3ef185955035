//! Realtime Event Bus Implementation

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::RealtimeEvent;
use crate::room::RoomKey;
use crate::transport::{Transport, TransportEvent};
use crate::BusError;

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Entries kept in the recent-event list (default: 50)
    pub recent_capacity: usize,
    /// Buffer of the subscriber fan-out channel
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            recent_capacity: 50,
            channel_capacity: 256,
        }
    }
}

/// State shared with the inbound pump
struct Shared {
    config: BusConfig,
    transport: Arc<dyn Transport>,
    rooms: Mutex<BTreeSet<RoomKey>>,
    recent: Mutex<VecDeque<RealtimeEvent>>,
    events: broadcast::Sender<RealtimeEvent>,
    connected: watch::Sender<bool>,
    connections: AtomicU64,
}

/// Room-scoped lecture event bus
pub struct RealtimeEventBus {
    shared: Arc<Shared>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RealtimeEventBus {
    pub fn new(transport: Arc<dyn Transport>, config: BusConfig) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        let (connected, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                rooms: Mutex::new(BTreeSet::new()),
                recent: Mutex::new(VecDeque::new()),
                events,
                connected,
                connections: AtomicU64::new(0),
            }),
            pump: Mutex::new(None),
        }
    }

    /// Open the persistent connection. Reconnects are handled by the transport.
    pub async fn connect(&self) -> Result<(), BusError> {
        let inbound = self.shared.transport.connect().await?;
        let shared = Arc::clone(&self.shared);
        let pump = tokio::spawn(pump(shared, inbound));
        if let Some(previous) = lock(&self.pump).replace(pump) {
            previous.abort();
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.shared.transport.disconnect().await;
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        self.shared.connected.send_replace(false);
        info!("Event bus disconnected");
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Connection state changes
    pub fn watch_connection(&self) -> watch::Receiver<bool> {
        self.shared.connected.subscribe()
    }

    /// Join a room. Membership is replayed after every reconnect.
    pub async fn join_room(&self, room: &RoomKey) -> Result<(), BusError> {
        let added = lock(&self.shared.rooms).insert(room.clone());
        if !added {
            debug!("Already in room {}", room);
        }
        if self.is_connected() {
            if let Err(e) = self.shared.transport.subscribe(&room.topic()).await {
                // Retried by the replay on the next reconnect
                warn!("Joining room {} deferred: {}", room, e);
            }
        }
        info!("Joined room {}", room);
        Ok(())
    }

    pub async fn leave_room(&self, room: &RoomKey) -> Result<(), BusError> {
        if !lock(&self.shared.rooms).remove(room) {
            return Ok(());
        }
        if self.is_connected() {
            self.shared.transport.unsubscribe(&room.topic()).await?;
        }
        info!("Left room {}", room);
        Ok(())
    }

    pub fn rooms(&self) -> Vec<RoomKey> {
        lock(&self.shared.rooms).iter().cloned().collect()
    }

    /// Publish an event to its room
    pub async fn broadcast(&self, event: &RealtimeEvent) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        let payload = event.to_bytes()?;
        self.shared
            .transport
            .publish(&event.room.topic(), payload)
            .await?;
        debug!(
            "Broadcast {:?} for lecture {} to {}",
            event.event_type,
            event.lecture_id(),
            event.room
        );
        Ok(())
    }

    /// Inbound events in arrival order
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.shared.events.subscribe()
    }

    /// Most recent inbound events, oldest first
    pub fn recent(&self) -> Vec<RealtimeEvent> {
        lock(&self.shared.recent).iter().cloned().collect()
    }

    /// Number of connections established so far
    pub fn connection_count(&self) -> u64 {
        self.shared.connections.load(Ordering::Acquire)
    }
}

async fn pump(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Connected => {
                let count = shared.connections.fetch_add(1, Ordering::AcqRel) + 1;
                if count > 1 {
                    metrics::counter!("bus_reconnects_total").increment(1);
                }
                // Flag first so a concurrent join subscribes itself
                shared.connected.send_replace(true);
                replay_rooms(&shared).await;
                info!("Event bus connected (connection #{})", count);
            }
            TransportEvent::Disconnected(reason) => {
                shared.connected.send_replace(false);
                warn!("Event bus disconnected: {}", reason);
            }
            TransportEvent::Message { topic, payload } => {
                let event = match RealtimeEvent::from_bytes(&payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Undecodable event on {}: {}", topic, e);
                        continue;
                    }
                };
                if RoomKey::from_topic(&topic).as_ref() != Some(&event.room) {
                    debug!("Event for room {} arrived on {}", event.room, topic);
                }

                {
                    let mut recent = lock(&shared.recent);
                    recent.push_back(event.clone());
                    while recent.len() > shared.config.recent_capacity {
                        recent.pop_front();
                    }
                }
                // No subscribers is fine
                let _ = shared.events.send(event);
            }
        }
    }
    shared.connected.send_replace(false);
    debug!("Event bus pump exited");
}

/// The server keeps no membership across connections
async fn replay_rooms(shared: &Shared) {
    let rooms: Vec<RoomKey> = lock(&shared.rooms).iter().cloned().collect();
    for room in rooms {
        match shared.transport.subscribe(&room.topic()).await {
            Ok(()) => debug!("Rejoined room {}", room),
            Err(e) => warn!("Rejoining room {} failed: {}", room, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{spawn_live_tracker, LiveLectures};
    use crate::transport::{LoopbackBroker, LoopbackTransport};
    use std::time::Duration;

    async fn connected_bus(broker: &Arc<LoopbackBroker>) -> (RealtimeEventBus, Arc<LoopbackTransport>) {
        let transport = Arc::new(LoopbackTransport::new(broker));
        let bus = RealtimeEventBus::new(transport.clone(), BusConfig::default());
        bus.connect().await.unwrap();
        let mut state = bus.watch_connection();
        state.wait_for(|c| *c).await.unwrap();
        (bus, transport)
    }

    async fn next(rx: &mut broadcast::Receiver<RealtimeEvent>) -> RealtimeEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event not delivered")
            .unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_room_members() {
        let broker = LoopbackBroker::new();
        let (teacher, _) = connected_bus(&broker).await;
        let (student, _) = connected_bus(&broker).await;
        let room = RoomKey::new("10", Some("A"));

        student.join_room(&room).await.unwrap();
        let mut rx = student.subscribe();
        teacher
            .broadcast(&RealtimeEvent::lecture_started(room.clone(), 42, "Optics", "Physics"))
            .await
            .unwrap();

        let event = next(&mut rx).await;
        assert_eq!(event.lecture_id(), 42);
        assert_eq!(student.recent().len(), 1);
        assert!(teacher.recent().is_empty());
    }

    #[tokio::test]
    async fn test_rooms_replayed_after_reconnect() {
        let broker = LoopbackBroker::new();
        let (teacher, _) = connected_bus(&broker).await;
        let (student, transport) = connected_bus(&broker).await;
        let room = RoomKey::new("10", None);
        student.join_room(&room).await.unwrap();

        let mut state = student.watch_connection();
        transport.drop_connection();
        state.wait_for(|c| !*c).await.unwrap();
        assert!(transport.subscriptions().is_empty());

        transport.restore_connection();
        state.wait_for(|c| *c).await.unwrap();
        assert_eq!(transport.subscriptions(), vec![room.topic()]);
        assert_eq!(student.connection_count(), 2);

        let mut rx = student.subscribe();
        teacher.broadcast(&RealtimeEvent::lecture_ended(room, 7)).await.unwrap();
        assert_eq!(next(&mut rx).await.lecture_id(), 7);
    }

    #[tokio::test]
    async fn test_redelivered_start_yields_one_live_entry() {
        let broker = LoopbackBroker::new();
        let (teacher, _) = connected_bus(&broker).await;
        let (student, transport) = connected_bus(&broker).await;
        let room = RoomKey::new("10", Some("A"));
        student.join_room(&room).await.unwrap();

        let live = Arc::new(Mutex::new(LiveLectures::new()));
        let tracker = spawn_live_tracker(&student, Arc::clone(&live));
        let mut rx = student.subscribe();

        let started = RealtimeEvent::lecture_started(room.clone(), 42, "Optics", "Physics");
        teacher.broadcast(&started).await.unwrap();
        next(&mut rx).await;

        let mut state = student.watch_connection();
        transport.drop_connection();
        state.wait_for(|c| !*c).await.unwrap();
        transport.restore_connection();
        state.wait_for(|c| *c).await.unwrap();
        assert_eq!(transport.subscriptions(), vec![room.topic()]);

        // The broker redelivers the start after the reconnect
        teacher.broadcast(&started).await.unwrap();
        next(&mut rx).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(student.recent().len(), 2);
        assert_eq!(live.lock().unwrap().len(), 1);
        assert!(live.lock().unwrap().get(42).unwrap().started);
        tracker.abort();
    }

    #[tokio::test]
    async fn test_recent_list_is_bounded() {
        let broker = LoopbackBroker::new();
        let (teacher, _) = connected_bus(&broker).await;
        let (student, _) = connected_bus(&broker).await;
        let room = RoomKey::new("11", Some("B"));
        student.join_room(&room).await.unwrap();
        let mut rx = student.subscribe();

        for id in 0..60 {
            teacher
                .broadcast(&RealtimeEvent::lecture_ended(room.clone(), id))
                .await
                .unwrap();
        }
        for _ in 0..60 {
            next(&mut rx).await;
        }

        let recent = student.recent();
        assert_eq!(recent.len(), 50);
        assert_eq!(recent.first().unwrap().lecture_id(), 10);
        assert_eq!(recent.last().unwrap().lecture_id(), 59);
    }

    #[tokio::test]
    async fn test_broadcast_requires_connection() {
        let broker = LoopbackBroker::new();
        let transport = Arc::new(LoopbackTransport::new(&broker));
        let bus = RealtimeEventBus::new(transport, BusConfig::default());
        let room = RoomKey::new("10", None);

        assert_eq!(
            bus.broadcast(&RealtimeEvent::lecture_ended(room.clone(), 1)).await,
            Err(BusError::NotConnected)
        );
        // Joining offline only records the room
        bus.join_room(&room).await.unwrap();
        assert_eq!(bus.rooms(), vec![room]);
    }
}
