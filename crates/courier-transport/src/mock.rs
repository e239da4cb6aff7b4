use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use courier_core::session::SessionKey;

use crate::credentials::CredentialBlob;
use crate::error::TransportError;
use crate::events::TransportEvent;
use crate::transport::{SentMessage, Transport, TransportConnection, TransportHandle};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A recorded outbound send.
#[derive(Clone, Debug)]
pub struct SentText {
    pub address: String,
    pub body: String,
}

/// Handle produced by MockTransport. Tests drive the session by emitting
/// further events through it and inspect what was sent.
pub struct MockHandle {
    key: SessionKey,
    events_tx: mpsc::Sender<TransportEvent>,
    sent: Mutex<Vec<SentText>>,
    send_error: Mutex<Option<TransportError>>,
    logged_out: AtomicBool,
    send_count: AtomicUsize,
}

impl MockHandle {
    /// Push an event into this connection's stream, as if the protocol
    /// engine emitted it.
    pub async fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event).await;
    }

    /// Everything sent through this handle, in order.
    pub fn sent(&self) -> Vec<SentText> {
        self.sent.lock().clone()
    }

    pub fn send_count(&self) -> usize {
        self.send_count.load(Ordering::Relaxed)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::Relaxed)
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Make the next send fail with the given error.
    pub fn fail_next_send(&self, error: TransportError) {
        *self.send_error.lock() = Some(error);
    }
}

#[async_trait]
impl TransportHandle for MockHandle {
    async fn send_text(&self, address: &str, body: &str) -> Result<SentMessage, TransportError> {
        if self.logged_out.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        if let Some(error) = self.send_error.lock().take() {
            return Err(error);
        }
        let n = self.send_count.fetch_add(1, Ordering::Relaxed);
        self.sent.lock().push(SentText {
            address: address.to_string(),
            body: body.to_string(),
        });
        Ok(SentMessage {
            protocol_message_id: format!("mock-{n}"),
        })
    }

    async fn logout(&self) -> Result<(), TransportError> {
        if self.logged_out.swap(true, Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

/// Deterministic transport for tests: each connect consumes the next
/// scripted event list (empty when the script runs out) and hands back a
/// handle tests can drive directly.
pub struct MockTransport {
    scripts: Mutex<VecDeque<Vec<TransportEvent>>>,
    fail_connects: Mutex<VecDeque<TransportError>>,
    connect_count: AtomicUsize,
    handles: Mutex<Vec<Arc<MockHandle>>>,
    last_creds: Mutex<Option<CredentialBlob>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fail_connects: Mutex::new(VecDeque::new()),
            connect_count: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
            last_creds: Mutex::new(None),
        }
    }

    /// Queue events to replay on the next connect.
    pub fn script_connect(&self, events: Vec<TransportEvent>) {
        self.scripts.lock().push_back(events);
    }

    /// Queue a connect failure ahead of any scripted successes.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.fail_connects.lock().push_back(error);
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::Relaxed)
    }

    /// Handle from the most recent successful connect.
    pub fn last_handle(&self) -> Option<Arc<MockHandle>> {
        self.handles.lock().last().cloned()
    }

    pub fn handles(&self) -> Vec<Arc<MockHandle>> {
        self.handles.lock().clone()
    }

    /// Credentials supplied to the most recent connect.
    pub fn last_creds(&self) -> Option<CredentialBlob> {
        self.last_creds.lock().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        key: &SessionKey,
        creds: Option<CredentialBlob>,
    ) -> Result<TransportConnection, TransportError> {
        self.connect_count.fetch_add(1, Ordering::Relaxed);
        *self.last_creds.lock() = creds;

        if let Some(error) = self.fail_connects.lock().pop_front() {
            return Err(error);
        }

        let scripted = self.scripts.lock().pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        for event in scripted {
            let _ = tx.send(event).await;
        }

        let handle = Arc::new(MockHandle {
            key: key.clone(),
            events_tx: tx,
            sent: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
            logged_out: AtomicBool::new(false),
            send_count: AtomicUsize::new(0),
        });
        self.handles.lock().push(handle.clone());

        Ok(TransportConnection {
            handle: handle.clone(),
            events: rx,
        })
    }
}
