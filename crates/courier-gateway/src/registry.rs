use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument};

use courier_core::address;
use courier_core::disconnect::DisconnectReason;
use courier_core::events::SessionEvent;
use courier_core::session::{SessionKey, SessionSnapshot, SessionStatus};
use courier_store::{Database, SessionRepo};
use courier_transport::{CredentialStore, SentMessage, Transport, TransportHandle};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::qr::QrRenderer;
use crate::relay::MessageRelay;
use crate::session;

pub(crate) type HandleSlot = Arc<Mutex<Option<Arc<dyn TransportHandle>>>>;

/// Caller-facing view of a live session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub key: SessionKey,
    pub status: SessionStatus,
    pub qr_code: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: String,
}

/// One live session owned by the registry. The supervisor task publishes
/// snapshots; the handle slot holds the transport handle only while a
/// connection is open.
pub(crate) struct SessionEntry {
    pub(crate) epoch: u64,
    pub(crate) snapshot_rx: watch::Receiver<SessionSnapshot>,
    pub(crate) handle: HandleSlot,
    pub(crate) task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    pub(crate) created_at: String,
}

pub(crate) struct RegistryInner {
    pub(crate) config: GatewayConfig,
    pub(crate) session_repo: SessionRepo,
    pub(crate) relay: MessageRelay,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) creds: Arc<CredentialStore>,
    pub(crate) qr: Arc<dyn QrRenderer>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) sessions: DashMap<SessionKey, Arc<SessionEntry>>,
    start_locks: DashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>,
    epoch: AtomicU64,
}

impl RegistryInner {
    pub(crate) fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Remove the entry for a key, but only if it is still the one the
    /// caller owns. A session restarted in the meantime is left alone.
    pub(crate) fn remove_if_epoch(&self, key: &SessionKey, epoch: u64) {
        self.sessions.remove_if(key, |_, entry| entry.epoch == epoch);
        self.prune_start_lock(key);
    }

    /// Drop the per-key start lock once no starter holds it. Keys are
    /// caller-controlled input, so the lock map must not outlive sessions.
    /// A starter still holding a clone keeps the entry alive, which is what
    /// preserves mutual exclusion across a concurrent teardown.
    fn prune_start_lock(&self, key: &SessionKey) {
        self.start_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Process-wide session lifecycle owner: one entry and one supervisor task
/// per SessionKey, at most one live transport handle per key.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        db: Database,
        transport: Arc<dyn Transport>,
        creds: Arc<CredentialStore>,
        qr: Arc<dyn QrRenderer>,
        config: GatewayConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        let relay = MessageRelay::new(db.clone(), events.clone());
        Self {
            inner: Arc::new(RegistryInner {
                config,
                session_repo: SessionRepo::new(db),
                relay,
                transport,
                creds,
                qr,
                events,
                sessions: DashMap::new(),
                start_locks: DashMap::new(),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to the lifecycle/message event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Pure lookup, no side effect.
    pub fn get(&self, key: &SessionKey) -> Option<SessionView> {
        let entry = self.inner.sessions.get(key)?.value().clone();
        Some(view_of(key, &entry))
    }

    /// Count of sessions live in this process.
    pub fn active_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Start (or reuse) the session for a key, then wait until a QR
    /// challenge or a connection is reached, bounded by the configured
    /// deadline. Returns whatever state exists at that point.
    ///
    /// Concurrent starts for one key are serialized by a per-key lock, so
    /// at most one transport is ever opened per key.
    #[instrument(skip(self), fields(session_key = %key, client_id = %key.client_id))]
    pub async fn start(&self, key: &SessionKey) -> SessionView {
        let lock = self
            .inner
            .start_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone();
        let guard = lock.lock().await;

        let entry = match self.inner.sessions.get(key) {
            Some(entry) => entry.value().clone(),
            None => self.spawn_session(key),
        };
        drop(guard);

        let mut rx = entry.snapshot_rx.clone();
        let _ = tokio::time::timeout(self.inner.config.start_wait, async {
            loop {
                if rx.borrow().status != SessionStatus::Connecting {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        view_of(key, &entry)
    }

    /// Send a text message to a destination via a connected session.
    /// Requires status = connected; the destination is normalized first.
    #[instrument(skip(self, text), fields(session_key = %key, client_id = %key.client_id))]
    pub async fn send(
        &self,
        key: &SessionKey,
        to: &str,
        text: &str,
        lead_id: Option<String>,
    ) -> Result<SentMessage, GatewayError> {
        let entry = self
            .inner
            .sessions
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| GatewayError::NotConnected { key: key.clone() })?;
        if entry.snapshot_rx.borrow().status != SessionStatus::Connected {
            return Err(GatewayError::NotConnected { key: key.clone() });
        }
        let handle = entry
            .handle
            .lock()
            .clone()
            .ok_or_else(|| GatewayError::NotConnected { key: key.clone() })?;

        let address = address::normalize(to, &self.inner.config.default_country_code);
        let sent = handle.send_text(&address, text).await?;

        // Already transmitted; persistence is best effort from here.
        self.inner.relay.record_outbound(key, &address, &sent, text, lead_id);
        Ok(sent)
    }

    /// Log the session out at the remote and tear it down. Transport and
    /// store failures propagate to the caller.
    #[instrument(skip(self), fields(session_key = %key, client_id = %key.client_id))]
    pub async fn disconnect(&self, key: &SessionKey) -> Result<(), GatewayError> {
        let entry = self
            .inner
            .sessions
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| GatewayError::SessionNotFound { key: key.clone() })?;

        let handle = entry.handle.lock().clone();
        if let Some(handle) = handle {
            handle.logout().await?;
        }

        self.remove(key);
        self.inner.session_repo.mark_disconnected(key)?;
        self.inner.publish(SessionEvent::Disconnected {
            key: key.clone(),
            reason: DisconnectReason::LoggedOut,
        });
        info!(session_key = %key, "session disconnected by request");
        Ok(())
    }

    /// Drop a session entry and stop its supervisor. Idempotent.
    pub fn remove(&self, key: &SessionKey) {
        if let Some((_, entry)) = self.inner.sessions.remove(key) {
            if let Some(task) = entry.task.lock().take() {
                task.abort();
            }
        }
        self.inner.prune_start_lock(key);
    }

    fn spawn_session(&self, key: &SessionKey) -> Arc<SessionEntry> {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::Relaxed);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::connecting());
        let handle: HandleSlot = Arc::new(Mutex::new(None));

        let entry = Arc::new(SessionEntry {
            epoch,
            snapshot_rx,
            handle: handle.clone(),
            task: Mutex::new(None),
            created_at: Utc::now().to_rfc3339(),
        });
        self.inner.sessions.insert(key.clone(), entry.clone());

        info!(session_key = %key, "session starting");
        let task = tokio::spawn(session::run(
            self.inner.clone(),
            key.clone(),
            epoch,
            snapshot_tx,
            handle,
        ));
        *entry.task.lock() = Some(task);
        entry
    }
}

fn view_of(key: &SessionKey, entry: &SessionEntry) -> SessionView {
    let snap = entry.snapshot_rx.borrow().clone();
    SessionView {
        key: key.clone(),
        status: snap.status,
        qr_code: snap.qr_code,
        phone_number: snap.phone_number,
        created_at: entry.created_at.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use courier_core::messages::Direction;
    use courier_store::MessageRepo;
    use courier_transport::{
        CredentialBlob, InboundMessage, MockTransport, TransportError, TransportEvent,
    };

    use crate::qr::DataUrlRenderer;

    struct Fixture {
        registry: SessionRegistry,
        transport: Arc<MockTransport>,
        db: Database,
        key: SessionKey,
    }

    fn setup(config: GatewayConfig) -> Fixture {
        let db = Database::in_memory().unwrap();
        let transport = Arc::new(MockTransport::new());
        let creds_dir =
            std::env::temp_dir().join(format!("courier-gw-test-{}", courier_core::MessageId::new()));
        let registry = SessionRegistry::new(
            db.clone(),
            transport.clone(),
            Arc::new(CredentialStore::new(creds_dir)),
            Arc::new(DataUrlRenderer),
            config,
        );
        Fixture {
            registry,
            transport,
            db,
            key: SessionKey::new("acme", None),
        }
    }

    fn opened() -> TransportEvent {
        TransportEvent::Opened {
            phone_number: Some("972500000001".into()),
        }
    }

    async fn next_event(
        rx: &mut broadcast::Receiver<SessionEvent>,
        event_type: &str,
    ) -> SessionEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if event.event_type() == event_type {
                return event;
            }
        }
    }

    async fn wait_for_connects(transport: &MockTransport, n: usize) {
        for _ in 0..200 {
            if transport.connect_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("never reached {n} connects, got {}", transport.connect_count());
    }

    #[tokio::test]
    async fn start_reaches_qr_ready() {
        let f = setup(GatewayConfig::default());
        f.transport
            .script_connect(vec![TransportEvent::QrIssued { raw: "2@abc".into() }]);
        let mut events = f.registry.subscribe();

        let view = f.registry.start(&f.key).await;
        assert_eq!(view.status, SessionStatus::QrReady);
        let qr = view.qr_code.unwrap();
        assert!(qr.contains("2@abc"));

        // Exactly one upsert with the challenge, one qr_code publish
        let row = SessionRepo::new(f.db.clone()).get_by_key(&f.key).unwrap();
        assert_eq!(row.status, SessionStatus::QrReady);
        assert_eq!(row.qr_code.as_deref(), Some(qr.as_str()));

        match next_event(&mut events, "qr_code").await {
            SessionEvent::QrCode { key, qr: published } => {
                assert_eq!(key.topic(), "acme-default");
                assert_eq!(published, qr);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_on_connected_session_reuses_it() {
        let f = setup(GatewayConfig::default());
        f.transport.script_connect(vec![opened()]);

        let first = f.registry.start(&f.key).await;
        assert_eq!(first.status, SessionStatus::Connected);
        assert_eq!(first.phone_number.as_deref(), Some("972500000001"));

        let second = f.registry.start(&f.key).await;
        assert_eq!(second.status, SessionStatus::Connected);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(f.transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_starts_open_one_transport() {
        let f = setup(GatewayConfig::default());
        f.transport
            .script_connect(vec![TransportEvent::QrIssued { raw: "2@abc".into() }]);

        let (a, b) = tokio::join!(f.registry.start(&f.key), f.registry.start(&f.key));
        assert_eq!(a.status, SessionStatus::QrReady);
        assert_eq!(b.status, SessionStatus::QrReady);
        assert_eq!(f.transport.connect_count(), 1);
        assert_eq!(f.registry.active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_returns_connecting_at_deadline() {
        let f = setup(GatewayConfig::default());
        // No scripted events: the session never progresses
        let view = f.registry.start(&f.key).await;
        assert_eq!(view.status, SessionStatus::Connecting);
        assert!(view.qr_code.is_none());
    }

    #[tokio::test]
    async fn send_without_session_fails() {
        let f = setup(GatewayConfig::default());
        let result = f.registry.send(&f.key, "0501234567", "hi", None).await;
        assert!(matches!(result, Err(GatewayError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn send_while_qr_ready_fails_with_no_side_effects() {
        let f = setup(GatewayConfig::default());
        f.transport
            .script_connect(vec![TransportEvent::QrIssued { raw: "2@abc".into() }]);
        f.registry.start(&f.key).await;

        let result = f.registry.send(&f.key, "0501234567", "hi", None).await;
        assert!(matches!(result, Err(GatewayError::NotConnected { .. })));

        let handle = f.transport.last_handle().unwrap();
        assert_eq!(handle.send_count(), 0);
        assert!(MessageRepo::new(f.db.clone())
            .list_for_client("acme", None, 50)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn send_normalizes_persists_and_returns_id() {
        let f = setup(GatewayConfig::default());
        f.transport.script_connect(vec![opened()]);
        f.registry.start(&f.key).await;
        let mut events = f.registry.subscribe();

        let sent = f
            .registry
            .send(&f.key, "0501234567", "hi", Some("lead-7".into()))
            .await
            .unwrap();
        assert_eq!(sent.protocol_message_id, "mock-0");

        let handle = f.transport.last_handle().unwrap();
        assert_eq!(handle.sent().len(), 1);
        assert_eq!(handle.sent()[0].address, "972501234567@s.whatsapp.net");
        assert_eq!(handle.sent()[0].body, "hi");

        let rows = MessageRepo::new(f.db.clone())
            .list_for_client("acme", None, 50)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].direction, Direction::Outbound);
        assert_eq!(rows[0].to_address, "972501234567@s.whatsapp.net");
        assert_eq!(rows[0].lead_id.as_deref(), Some("lead-7"));

        assert!(matches!(
            next_event(&mut events, "message").await,
            SessionEvent::Message { .. }
        ));
    }

    #[tokio::test]
    async fn send_propagates_transport_error_without_row() {
        let f = setup(GatewayConfig::default());
        f.transport.script_connect(vec![opened()]);
        f.registry.start(&f.key).await;

        let handle = f.transport.last_handle().unwrap();
        handle.fail_next_send(TransportError::SendFailed("socket reset".into()));

        let result = f.registry.send(&f.key, "0501234567", "hi", None).await;
        assert!(matches!(result, Err(GatewayError::Transport(_))));
        assert!(MessageRepo::new(f.db.clone())
            .list_for_client("acme", None, 50)
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_close_removes_session_without_reconnect() {
        let f = setup(GatewayConfig::default());
        f.transport.script_connect(vec![opened()]);
        f.registry.start(&f.key).await;
        let mut events = f.registry.subscribe();

        let handle = f.transport.last_handle().unwrap();
        handle
            .emit(TransportEvent::Closed {
                reason: DisconnectReason::LoggedOut,
            })
            .await;

        match next_event(&mut events, "disconnected").await {
            SessionEvent::Disconnected { reason, .. } => {
                assert_eq!(reason, DisconnectReason::LoggedOut)
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert!(f.registry.get(&f.key).is_none());
        assert_eq!(f.registry.inner.start_locks.len(), 0);
        let row = SessionRepo::new(f.db.clone()).get_by_key(&f.key).unwrap();
        assert_eq!(row.status, SessionStatus::Disconnected);
        assert!(row.qr_code.is_none());

        // Well past the reconnect delay: still exactly one connect
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_close_schedules_one_reconnect() {
        let f = setup(GatewayConfig::default());
        f.transport.script_connect(vec![opened()]);
        f.registry.start(&f.key).await;

        let handle = f.transport.last_handle().unwrap();
        handle
            .emit(TransportEvent::Closed {
                reason: DisconnectReason::ConnectionLost,
            })
            .await;

        wait_for_connects(&f.transport, 2).await;
        // Session survives the drop; the fresh connection is still connecting
        let view = f.registry.get(&f.key).unwrap();
        assert_eq!(view.status, SessionStatus::Connecting);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.transport.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_attempts_are_bounded() {
        let mut config = GatewayConfig::default();
        config.reconnect.max_attempts = 2;
        let f = setup(config);
        for _ in 0..3 {
            f.transport.script_connect(vec![TransportEvent::Closed {
                reason: DisconnectReason::ConnectionLost,
            }]);
        }
        let mut events = f.registry.subscribe();

        f.registry.start(&f.key).await;

        match next_event(&mut events, "disconnected").await {
            SessionEvent::Disconnected { reason, .. } => {
                assert_eq!(reason, DisconnectReason::ConnectionLost)
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Initial connect plus two retries, then gave up
        assert_eq!(f.transport.connect_count(), 3);
        assert!(f.registry.get(&f.key).is_none());
    }

    #[tokio::test]
    async fn removed_sessions_release_their_start_locks() {
        let f = setup(GatewayConfig::default());

        for i in 0..50 {
            f.transport.script_connect(vec![opened()]);
            let key = SessionKey::new(format!("client-{i}"), None);
            f.registry.start(&key).await;
            f.registry.remove(&key);
        }

        assert_eq!(f.registry.active_count(), 0);
        assert_eq!(f.registry.inner.start_locks.len(), 0);

        // A pruned key starts cleanly again with a fresh lock
        f.transport.script_connect(vec![opened()]);
        let key = SessionKey::new("client-0", None);
        let view = f.registry.start(&key).await;
        assert_eq!(view.status, SessionStatus::Connected);
        assert_eq!(f.registry.active_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_logs_out_and_tears_down() {
        let f = setup(GatewayConfig::default());
        f.transport.script_connect(vec![opened()]);
        f.registry.start(&f.key).await;
        let mut events = f.registry.subscribe();

        f.registry.disconnect(&f.key).await.unwrap();

        let handle = f.transport.last_handle().unwrap();
        assert!(handle.is_logged_out());
        assert!(f.registry.get(&f.key).is_none());

        let row = SessionRepo::new(f.db.clone()).get_by_key(&f.key).unwrap();
        assert_eq!(row.status, SessionStatus::Disconnected);

        assert!(matches!(
            next_event(&mut events, "disconnected").await,
            SessionEvent::Disconnected { .. }
        ));
    }

    #[tokio::test]
    async fn disconnect_unknown_session_fails() {
        let f = setup(GatewayConfig::default());
        let result = f.registry.disconnect(&f.key).await;
        assert!(matches!(result, Err(GatewayError::SessionNotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn credentials_saved_and_reused_on_reconnect() {
        let f = setup(GatewayConfig::default());
        f.transport.script_connect(vec![opened()]);
        f.registry.start(&f.key).await;

        let blob = CredentialBlob(b"{\"noiseKey\":\"abc\"}".to_vec());
        let handle = f.transport.last_handle().unwrap();
        handle
            .emit(TransportEvent::CredsUpdated { blob: blob.clone() })
            .await;
        handle
            .emit(TransportEvent::Closed {
                reason: DisconnectReason::ConnectionLost,
            })
            .await;

        wait_for_connects(&f.transport, 2).await;
        assert_eq!(f.transport.last_creds(), Some(blob));
    }

    #[tokio::test]
    async fn inbound_message_reaches_store_and_subscribers() {
        let f = setup(GatewayConfig::default());
        f.transport.script_connect(vec![opened()]);
        f.registry.start(&f.key).await;
        let mut events = f.registry.subscribe();

        let handle = f.transport.last_handle().unwrap();
        handle
            .emit(TransportEvent::Message(InboundMessage {
                protocol_message_id: "3EB0".into(),
                chat_address: "1115550001@s.whatsapp.net".into(),
                from_address: "1115550001@s.whatsapp.net".into(),
                from_me: false,
                conversation: Some("hello".into()),
                extended_text: None,
            }))
            .await;

        match next_event(&mut events, "message").await {
            SessionEvent::Message { key, record } => {
                assert_eq!(key.topic(), "acme-default");
                assert_eq!(record.content, "hello");
                assert_eq!(record.direction, Direction::Inbound);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let rows = MessageRepo::new(f.db.clone())
            .list_for_client("acme", None, 50)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "hello");
    }
}
