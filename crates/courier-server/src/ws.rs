use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const SUBSCRIBER_TIMEOUT: Duration = Duration::from_secs(90);

/// Unique subscriber identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub String);

impl Default for SubscriberId {
    fn default() -> Self {
        Self(format!("sub_{}", Uuid::now_v7()))
    }
}

impl SubscriberId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected WebSocket subscriber and the topics it watches.
pub struct Subscriber {
    pub id: SubscriberId,
    pub topics: HashSet<String>,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_pong: AtomicU64,
}

impl Subscriber {
    fn new(id: SubscriberId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            topics: HashSet::new(),
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < SUBSCRIBER_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Control frames a subscriber may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ControlFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

/// Registry of all connected WebSocket subscribers, keyed by topic interest.
pub struct SubscriberRegistry {
    subscribers: DashMap<SubscriberId, Arc<Mutex<Subscriber>>>,
    max_send_queue: usize,
}

impl SubscriberRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new subscriber and return its ID + receive half.
    pub fn register(&self) -> (SubscriberId, mpsc::Receiver<String>) {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let subscriber = Arc::new(Mutex::new(Subscriber::new(id.clone(), tx)));
        self.subscribers.insert(id.clone(), subscriber);
        (id, rx)
    }

    /// Remove a subscriber by ID.
    pub fn unregister(&self, id: &SubscriberId) {
        if let Some((_, subscriber)) = self.subscribers.remove(id) {
            if let Ok(s) = subscriber.try_lock() {
                s.connected.store(false, Ordering::Relaxed);
            }
        }
    }

    pub async fn subscribe(&self, id: &SubscriberId, topic: &str) {
        if let Some(subscriber) = self.subscribers.get(id) {
            subscriber.lock().await.topics.insert(topic.to_string());
        }
    }

    pub async fn unsubscribe(&self, id: &SubscriberId, topic: &str) {
        if let Some(subscriber) = self.subscribers.get(id) {
            subscriber.lock().await.topics.remove(topic);
        }
    }

    /// Deliver a message to every live subscriber of a topic. Best effort:
    /// a full queue drops the message for that subscriber.
    pub fn broadcast_to_topic(&self, topic: &str, message: &str) {
        for entry in self.subscribers.iter() {
            if let Ok(subscriber) = entry.value().try_lock() {
                if subscriber.topics.contains(topic) && subscriber.is_connected() {
                    if let Err(mpsc::error::TrySendError::Full(_)) =
                        subscriber.tx.try_send(message.to_string())
                    {
                        tracing::warn!(
                            subscriber_id = %subscriber.id,
                            topic = topic,
                            "send queue full, dropping event"
                        );
                    }
                }
            }
        }
    }

    /// Number of connected subscribers.
    pub fn count(&self) -> usize {
        self.subscribers.len()
    }

    /// Remove subscribers that stopped answering pings.
    pub fn cleanup_dead_subscribers(&self) -> usize {
        let dead: Vec<SubscriberId> = self
            .subscribers
            .iter()
            .filter_map(|entry| {
                if let Ok(subscriber) = entry.value().try_lock() {
                    if !subscriber.is_alive() {
                        return Some(subscriber.id.clone());
                    }
                }
                None
            })
            .collect();

        let removed = dead.len();
        for id in dead {
            self.unregister(&id);
            tracing::info!(subscriber_id = %id, "cleaned up dead subscriber");
        }
        removed
    }
}

/// Handle one WebSocket connection: split into reader/writer, heartbeat the
/// peer, and honor subscribe/unsubscribe control frames until either side
/// drops.
pub async fn handle_ws_connection(
    socket: WebSocket,
    subscriber_id: SubscriberId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<SubscriberRegistry>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_sid = subscriber_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(subscriber_id = %writer_sid, "sent ping");
                }
            }
        }

        if let Some(subscriber) = writer_registry.subscribers.get(&writer_sid) {
            if let Ok(s) = subscriber.try_lock() {
                s.connected.store(false, Ordering::Relaxed);
            }
        }
    });

    let reader_sid = subscriber_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ControlFrame>(&text) {
                    Ok(ControlFrame::Subscribe { topic }) => {
                        tracing::debug!(subscriber_id = %reader_sid, topic = %topic, "subscribe");
                        reader_registry.subscribe(&reader_sid, &topic).await;
                    }
                    Ok(ControlFrame::Unsubscribe { topic }) => {
                        tracing::debug!(subscriber_id = %reader_sid, topic = %topic, "unsubscribe");
                        reader_registry.unsubscribe(&reader_sid, &topic).await;
                    }
                    Err(e) => {
                        tracing::debug!(subscriber_id = %reader_sid, error = %e, "unparseable frame");
                    }
                },
                WsMessage::Pong(_) => {
                    if let Some(subscriber) = reader_registry.subscribers.get(&reader_sid) {
                        if let Ok(s) = subscriber.try_lock() {
                            s.record_pong();
                        }
                    }
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pong automatically
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&subscriber_id);
}

/// Background task that periodically sweeps unresponsive subscribers.
pub fn start_cleanup_task(
    registry: Arc<SubscriberRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_subscribers();
            if removed > 0 {
                tracing::info!(removed = removed, "dead subscriber cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_id_unique() {
        let a = SubscriberId::new();
        let b = SubscriberId::new();
        assert_ne!(a, b);
        assert!(a.0.starts_with("sub_"));
    }

    #[test]
    fn register_and_unregister() {
        let registry = SubscriberRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_eq!(registry.count(), 2);

        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);

        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_only_topic_subscribers() {
        let registry = SubscriberRegistry::new(32);
        let (id1, mut rx1) = registry.register();
        let (id2, mut rx2) = registry.register();
        let (_id3, mut rx3) = registry.register();

        registry.subscribe(&id1, "acme-default").await;
        registry.subscribe(&id2, "acme-default").await;

        registry.broadcast_to_topic("acme-default", "hello");

        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let registry = SubscriberRegistry::new(32);
        let (id, mut rx) = registry.register();

        registry.subscribe(&id, "acme-default").await;
        registry.broadcast_to_topic("acme-default", "one");
        assert!(rx.try_recv().is_ok());

        registry.unsubscribe(&id, "acme-default").await;
        registry.broadcast_to_topic("acme-default", "two");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn one_subscriber_many_topics() {
        let registry = SubscriberRegistry::new(32);
        let (id, mut rx) = registry.register();

        registry.subscribe(&id, "acme-default").await;
        registry.subscribe(&id, "acme-support").await;

        registry.broadcast_to_topic("acme-default", "a");
        registry.broadcast_to_topic("acme-support", "b");

        assert_eq!(rx.try_recv().unwrap(), "a");
        assert_eq!(rx.try_recv().unwrap(), "b");
    }

    #[tokio::test]
    async fn full_queue_drops_event() {
        let registry = SubscriberRegistry::new(2); // tiny queue
        let (id, mut rx) = registry.register();
        registry.subscribe(&id, "t").await;

        registry.broadcast_to_topic("t", "1");
        registry.broadcast_to_topic("t", "2");
        registry.broadcast_to_topic("t", "3"); // dropped

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn pong_tracking() {
        let (tx, _rx) = mpsc::channel(1);
        let subscriber = Subscriber::new(SubscriberId::new(), tx);
        assert!(subscriber.is_alive());

        subscriber.record_pong();
        assert!(subscriber.is_alive());
    }

    #[test]
    fn cleanup_removes_expired_subscribers() {
        let registry = SubscriberRegistry::new(32);
        let (id, _rx) = registry.register();
        assert_eq!(registry.count(), 1);

        if let Some(subscriber) = registry.subscribers.get(&id) {
            if let Ok(s) = subscriber.try_lock() {
                s.last_pong.store(0, Ordering::Relaxed);
            }
        }

        let removed = registry.cleanup_dead_subscribers();
        assert_eq!(removed, 1);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn control_frames_parse() {
        let frame: ControlFrame =
            serde_json::from_str(r#"{"action":"subscribe","topic":"acme-default"}"#).unwrap();
        assert!(matches!(frame, ControlFrame::Subscribe { topic } if topic == "acme-default"));

        let frame: ControlFrame =
            serde_json::from_str(r#"{"action":"unsubscribe","topic":"acme-default"}"#).unwrap();
        assert!(matches!(frame, ControlFrame::Unsubscribe { .. }));
    }
}
