//! Pub/sub transports

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::BusError;

const DEFAULT_PORT: u16 = 1883;

/// Connection-level notifications from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Session established; the server holds no subscriptions yet
    Connected,
    Disconnected(String),
    Message { topic: String, payload: Vec<u8> },
}

/// Pub/sub connection used by the event bus
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the connection. Events stop when the receiver closes.
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, BusError>;

    async fn subscribe(&self, topic: &str) -> Result<(), BusError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    async fn disconnect(&self);
}

/// Exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt; doubles up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// MQTT connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker endpoints in fallback order (`host:port`, optional `mqtt://`)
    pub endpoints: Vec<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![format!("localhost:{}", DEFAULT_PORT)],
            client_id: format!("classroom-agent-{}", uuid::Uuid::new_v4().simple()),
            keep_alive_secs: 30,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

fn parse_endpoint(endpoint: &str) -> Result<(String, u16), BusError> {
    let trimmed = endpoint
        .trim()
        .trim_start_matches("mqtt://")
        .trim_start_matches("tcp://")
        .trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(BusError::InvalidEndpoint(endpoint.to_string()));
    }

    match trimmed.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BusError::InvalidEndpoint(endpoint.to_string()))?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(BusError::InvalidEndpoint(endpoint.to_string())),
        None => Ok((trimmed.to_string(), DEFAULT_PORT)),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// MQTT transport over rumqttc
pub struct MqttTransport {
    config: MqttConfig,
    /// Client of the current connection attempt
    client: Arc<Mutex<Option<AsyncClient>>>,
    /// Cancels the current connection loop; replaced on every connect
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            client: Arc::new(Mutex::new(None)),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    fn current_client(&self) -> Result<AsyncClient, BusError> {
        lock(&self.client).clone().ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, BusError> {
        if self.config.endpoints.is_empty() {
            return Err(BusError::Connection("no endpoints configured".to_string()));
        }
        let endpoints = self
            .config
            .endpoints
            .iter()
            .map(|e| parse_endpoint(e))
            .collect::<Result<Vec<_>, _>>()?;

        let cancel = CancellationToken::new();
        let previous = std::mem::replace(&mut *lock(&self.cancel), cancel.clone());
        previous.cancel();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(connection_loop(
            self.config.clone(),
            endpoints,
            Arc::clone(&self.client),
            tx,
            cancel,
        ));
        if let Some(previous) = lock(&self.task).replace(task) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.current_client()?
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        self.current_client()?
            .unsubscribe(topic)
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.current_client()?
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn disconnect(&self) {
        lock(&self.cancel).cancel();
        let client = lock(&self.client).take();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                debug!("MQTT disconnect: {}", e);
            }
        }
        let task = lock(&self.task).take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Reconnect forever, rotating through endpoints with exponential backoff
async fn connection_loop(
    config: MqttConfig,
    endpoints: Vec<(String, u16)>,
    slot: Arc<Mutex<Option<AsyncClient>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(
        Duration::from_millis(config.initial_backoff_ms),
        Duration::from_millis(config.max_backoff_ms),
    );
    let mut index = 0usize;

    while !cancel.is_cancelled() {
        let (host, port) = &endpoints[index % endpoints.len()];
        let mut options = MqttOptions::new(config.client_id.clone(), host.clone(), *port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        *lock(&slot) = Some(client);
        debug!("MQTT connecting to {}:{}", host, port);

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                polled = eventloop.poll() => match polled {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker {}:{}", host, port);
                        backoff.reset();
                        // Next reconnect starts again from the primary endpoint
                        index = 0;
                        if events.send(TransportEvent::Connected).is_err() {
                            return;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = TransportEvent::Message {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if events.send(message).is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => break e.to_string(),
                }
            }
        };

        *lock(&slot) = None;
        warn!("MQTT connection to {}:{} lost: {}", host, port, reason);
        if events.send(TransportEvent::Disconnected(reason)).is_err() {
            return;
        }

        index += 1;
        let delay = backoff.next_delay();
        debug!("MQTT retry in {:?}", delay);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    info!("MQTT connection loop cancelled");
}

/// In-process broker shared by loopback transports
#[derive(Default)]
pub struct LoopbackBroker {
    clients: Mutex<Vec<Arc<LoopbackClient>>>,
    published: Mutex<Vec<String>>,
}

#[derive(Default)]
struct LoopbackClient {
    online: AtomicBool,
    topics: Mutex<HashSet<String>>,
    tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl LoopbackClient {
    fn notify(&self, event: TransportEvent) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl LoopbackBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Topics published so far, in order
    pub fn published_topics(&self) -> Vec<String> {
        lock(&self.published).clone()
    }

    fn route(&self, topic: &str, payload: &[u8]) -> usize {
        lock(&self.published).push(topic.to_string());
        let clients = lock(&self.clients).clone();
        let mut delivered = 0;
        for client in clients {
            if client.online.load(Ordering::Acquire) && lock(&client.topics).contains(topic) {
                client.notify(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                });
                delivered += 1;
            }
        }
        delivered
    }
}

/// Transport connected to a [`LoopbackBroker`]
pub struct LoopbackTransport {
    broker: Arc<LoopbackBroker>,
    client: Arc<LoopbackClient>,
}

impl LoopbackTransport {
    pub fn new(broker: &Arc<LoopbackBroker>) -> Self {
        let client = Arc::new(LoopbackClient::default());
        lock(&broker.clients).push(Arc::clone(&client));
        Self {
            broker: Arc::clone(broker),
            client,
        }
    }

    /// Simulate a network drop: the broker forgets this client's subscriptions
    pub fn drop_connection(&self) {
        self.client.online.store(false, Ordering::Release);
        lock(&self.client.topics).clear();
        self.client
            .notify(TransportEvent::Disconnected("connection dropped".to_string()));
    }

    /// Simulate a successful reconnect
    pub fn restore_connection(&self) {
        self.client.online.store(true, Ordering::Release);
        self.client.notify(TransportEvent::Connected);
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = lock(&self.client.topics).iter().cloned().collect();
        topics.sort();
        topics
    }

    fn ensure_online(&self) -> Result<(), BusError> {
        if self.client.online.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BusError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.client.tx) = Some(tx);
        self.restore_connection();
        Ok(rx)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.ensure_online()?;
        lock(&self.client.topics).insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        self.ensure_online()?;
        lock(&self.client.topics).remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.ensure_online()?;
        let delivered = self.broker.route(topic, &payload);
        debug!("Loopback publish on {} reached {} clients", topic, delivered);
        Ok(())
    }

    async fn disconnect(&self) {
        self.client.online.store(false, Ordering::Release);
        lock(&self.client.topics).clear();
        lock(&self.client.tx).take();
    }
}
