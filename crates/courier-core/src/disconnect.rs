use serde::{Deserialize, Serialize};

/// Why a live transport connection closed.
/// Classifies closes as terminal (remote ended the session, no reconnect)
/// or transient (anything else, reconnect after a fixed delay).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    // Terminal — the remote end explicitly logged this session out
    LoggedOut,

    // Transient — reconnect
    ConnectionLost,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    RestartRequired,
    Unknown,
}

impl DisconnectReason {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }

    /// Short classification string for logging.
    pub fn reason_kind(&self) -> &'static str {
        match self {
            Self::LoggedOut => "logged_out",
            Self::ConnectionLost => "connection_lost",
            Self::ConnectionClosed => "connection_closed",
            Self::ConnectionReplaced => "connection_replaced",
            Self::BadSession => "bad_session",
            Self::RestartRequired => "restart_required",
            Self::Unknown => "unknown",
        }
    }

    /// Classify a protocol disconnect status code.
    pub fn from_code(code: u16) -> Self {
        match code {
            401 => Self::LoggedOut,
            408 => Self::ConnectionLost,
            428 => Self::ConnectionClosed,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            515 => Self::RestartRequired,
            _ => Self::Unknown,
        }
    }
}
