use serde::{Deserialize, Serialize};
use std::fmt;

/// Session name used when a request omits one.
pub const DEFAULT_SESSION_NAME: &str = "default";

/// Composite identifier naming one logical messaging connection.
/// Used as the map key everywhere: registry, subscriber topics, store lookup.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionKey {
    pub client_id: String,
    pub session_name: String,
}

impl SessionKey {
    pub fn new(client_id: impl Into<String>, session_name: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            session_name: session_name.unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
        }
    }

    /// Fan-out topic form, e.g. `"acme-default"`.
    pub fn topic(&self) -> String {
        format!("{}-{}", self.client_id, self.session_name)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.client_id, self.session_name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    QrReady,
    Connected,
    Disconnected,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::QrReady => write!(f, "qr_ready"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connecting" => Ok(Self::Connecting),
            "qr_ready" => Ok(Self::QrReady),
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Point-in-time view of a live session, published over a watch channel so
/// callers can await QR-or-connected without polling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub qr_code: Option<String>,
    pub phone_number: Option<String>,
}

impl SessionSnapshot {
    pub fn connecting() -> Self {
        Self {
            status: SessionStatus::Connecting,
            qr_code: None,
            phone_number: None,
        }
    }
}
