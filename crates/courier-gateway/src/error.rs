use courier_core::session::SessionKey;
use courier_store::StoreError;
use courier_transport::TransportError;

/// Errors surfaced by caller-facing gateway operations. Background failures
/// (reconnects, persistence) are absorbed and logged instead.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("session {key} is not connected")]
    NotConnected { key: SessionKey },

    #[error("no session for {key}")]
    SessionNotFound { key: SessionKey },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GatewayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotConnected { .. } => "not_connected",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::Transport(_) => "transport",
            Self::Store(_) => "store",
        }
    }

    /// True for errors caused by the request rather than the system.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::NotConnected { .. } | Self::SessionNotFound { .. })
    }
}
