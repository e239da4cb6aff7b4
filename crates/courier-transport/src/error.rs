/// Errors surfaced by a transport implementation. The core propagates these
/// to callers without retrying; reconnect policy acts on close events, not
/// on these.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("connection already closed")]
    Closed,

    #[error("credential error: {0}")]
    Credential(String),
}

impl TransportError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::SendFailed(_) => "send_failed",
            Self::Closed => "closed",
            Self::Credential(_) => "credential",
        }
    }
}
