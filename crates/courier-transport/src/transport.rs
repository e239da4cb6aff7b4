use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use courier_core::session::SessionKey;

use crate::credentials::CredentialBlob;
use crate::error::TransportError;
use crate::events::TransportEvent;

/// Result of a successful transmit: the identifier the protocol assigned.
#[derive(Clone, Debug)]
pub struct SentMessage {
    pub protocol_message_id: String,
}

/// One live protocol connection. Implementations own the socket; the core
/// only sends and logs out through this seam.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Transmit a text message to a canonical address. Errors propagate to
    /// the caller; the core does not retry sends.
    async fn send_text(&self, address: &str, body: &str) -> Result<SentMessage, TransportError>;

    /// End the session at the remote. Fails if the connection is already
    /// closed.
    async fn logout(&self) -> Result<(), TransportError>;
}

/// A freshly-opened connection: the command handle plus the ordered event
/// stream the per-session dispatcher consumes.
pub struct TransportConnection {
    pub handle: Arc<dyn TransportHandle>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Factory for live connections, one call per (re)connect attempt.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(
        &self,
        key: &SessionKey,
        creds: Option<CredentialBlob>,
    ) -> Result<TransportConnection, TransportError>;
}
