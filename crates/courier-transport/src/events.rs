use serde::{Deserialize, Serialize};

use courier_core::disconnect::DisconnectReason;

use crate::credentials::CredentialBlob;

/// One raw inbound message as delivered by the protocol engine. Content may
/// arrive in more than one shape; `text_content` applies the fixed
/// precedence order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundMessage {
    pub protocol_message_id: String,
    pub chat_address: String,
    pub from_address: String,
    /// Self-echo flag: true when this process sent the message.
    pub from_me: bool,
    pub conversation: Option<String>,
    pub extended_text: Option<String>,
}

impl InboundMessage {
    /// First non-empty content shape: plain conversation text, then
    /// extended/quoted text.
    pub fn text_content(&self) -> Option<&str> {
        self.conversation
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.extended_text.as_deref().filter(|s| !s.is_empty()))
    }
}

/// Ordered event stream emitted by a live transport connection. One
/// dispatcher per session consumes these in emission order.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// A pairing challenge the remote requires before opening.
    QrIssued { raw: String },
    /// The connection is open; carries the resolved address identity.
    Opened { phone_number: Option<String> },
    /// The connection closed; the reason decides terminal vs. transient.
    Closed { reason: DisconnectReason },
    /// Updated credential material, forwarded verbatim to storage.
    CredsUpdated { blob: CredentialBlob },
    Message(InboundMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(conversation: Option<&str>, extended: Option<&str>) -> InboundMessage {
        InboundMessage {
            protocol_message_id: "3EB0".into(),
            chat_address: "972501234567@s.whatsapp.net".into(),
            from_address: "972501234567@s.whatsapp.net".into(),
            from_me: false,
            conversation: conversation.map(String::from),
            extended_text: extended.map(String::from),
        }
    }

    #[test]
    fn conversation_takes_precedence() {
        let m = msg(Some("plain"), Some("extended"));
        assert_eq!(m.text_content(), Some("plain"));
    }

    #[test]
    fn falls_back_to_extended_text() {
        let m = msg(None, Some("extended"));
        assert_eq!(m.text_content(), Some("extended"));
    }

    #[test]
    fn empty_conversation_falls_through() {
        let m = msg(Some(""), Some("extended"));
        assert_eq!(m.text_content(), Some("extended"));
    }

    #[test]
    fn no_content_shapes() {
        assert_eq!(msg(None, None).text_content(), None);
        assert_eq!(msg(Some(""), Some("")).text_content(), None);
    }
}
