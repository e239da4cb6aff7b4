use serde::{Deserialize, Serialize};

use crate::disconnect::DisconnectReason;
use crate::messages::MessageRecord;
use crate::session::SessionKey;

/// Lifecycle and message events published to subscribers of a session's
/// topic. One tagged enumeration so every consumer dispatches on a single
/// ordered stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "qr_code")]
    QrCode {
        key: SessionKey,
        qr: String,
    },

    #[serde(rename = "connected")]
    Connected {
        key: SessionKey,
        phone_number: Option<String>,
    },

    #[serde(rename = "disconnected")]
    Disconnected {
        key: SessionKey,
        reason: DisconnectReason,
    },

    /// One per persisted inbound or outbound row, carrying the row verbatim.
    #[serde(rename = "message")]
    Message {
        key: SessionKey,
        record: MessageRecord,
    },
}

impl SessionEvent {
    pub fn key(&self) -> &SessionKey {
        match self {
            Self::QrCode { key, .. }
            | Self::Connected { key, .. }
            | Self::Disconnected { key, .. }
            | Self::Message { key, .. } => key,
        }
    }

    /// Fan-out topic this event belongs to.
    pub fn topic(&self) -> String {
        self.key().topic()
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::QrCode { .. } => "qr_code",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Message { .. } => "message",
        }
    }
}
