use tokio::sync::broadcast;
use tracing::{debug, instrument, trace, warn};

use courier_core::events::SessionEvent;
use courier_core::messages::{DeliveryStatus, Direction, MessageRecord, MessageType};
use courier_core::session::SessionKey;
use courier_store::{Database, MessageRepo, NewMessage, SessionRepo, StoreError};
use courier_transport::{InboundMessage, SentMessage};

/// Bridges message traffic to the durable store and the subscriber feed.
/// Persistence is best effort: a failed lookup or insert is logged and
/// dropped, never surfaced to the live messaging path.
pub struct MessageRelay {
    sessions: SessionRepo,
    messages: MessageRepo,
    events: broadcast::Sender<SessionEvent>,
}

impl MessageRelay {
    pub fn new(db: Database, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            messages: MessageRepo::new(db),
            events,
        }
    }

    /// Handle one inbound message event. Self-echoes and content-less
    /// events are ignored; a missing session row drops the message.
    #[instrument(skip(self, inbound), fields(session_key = %key, client_id = %key.client_id))]
    pub fn on_inbound(&self, key: &SessionKey, inbound: InboundMessage) -> Option<MessageRecord> {
        if inbound.from_me {
            trace!("ignoring self-echo");
            return None;
        }
        let content = match inbound.text_content() {
            Some(text) => text.to_string(),
            None => {
                debug!(protocol_message_id = %inbound.protocol_message_id, "ignoring message with no text content");
                return None;
            }
        };

        let row = match self.sessions.get_by_key(key) {
            Ok(row) => row,
            Err(StoreError::NotFound(_)) => {
                warn!(
                    chat = %inbound.chat_address,
                    "dropping inbound message, no session row"
                );
                return None;
            }
            Err(e) => {
                warn!(error = %e, "dropping inbound message, session lookup failed");
                return None;
            }
        };

        let record = match self.messages.insert(NewMessage {
            session_id: row.id,
            lead_id: None,
            protocol_message_id: inbound.protocol_message_id,
            chat_address: inbound.chat_address.clone(),
            from_address: inbound.from_address,
            to_address: row.phone_number.unwrap_or_else(|| "me".to_string()),
            message_type: MessageType::Text,
            content,
            direction: Direction::Inbound,
            delivery_status: DeliveryStatus::Received,
        }) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "dropping inbound message, insert failed");
                return None;
            }
        };

        self.publish(key, record.clone());
        Some(record)
    }

    /// Persist an already-transmitted outbound message. The send succeeded
    /// regardless of what happens here.
    #[instrument(skip(self, sent, content), fields(session_key = %key, client_id = %key.client_id))]
    pub fn record_outbound(
        &self,
        key: &SessionKey,
        to_address: &str,
        sent: &SentMessage,
        content: &str,
        lead_id: Option<String>,
    ) -> Option<MessageRecord> {
        let row = match self.sessions.get_by_key(key) {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "sent message not persisted, session lookup failed");
                return None;
            }
        };

        let record = match self.messages.insert(NewMessage {
            session_id: row.id,
            lead_id,
            protocol_message_id: sent.protocol_message_id.clone(),
            chat_address: to_address.to_string(),
            from_address: row.phone_number.unwrap_or_else(|| "me".to_string()),
            to_address: to_address.to_string(),
            message_type: MessageType::Text,
            content: content.to_string(),
            direction: Direction::Outbound,
            delivery_status: DeliveryStatus::Sent,
        }) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "sent message not persisted, insert failed");
                return None;
            }
        };

        self.publish(key, record.clone());
        Some(record)
    }

    fn publish(&self, key: &SessionKey, record: MessageRecord) {
        // No subscribers is fine; send only fails when the channel is empty.
        let _ = self.events.send(SessionEvent::Message {
            key: key.clone(),
            record,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (MessageRelay, Database, broadcast::Receiver<SessionEvent>, SessionKey) {
        let db = Database::in_memory().unwrap();
        let (tx, rx) = broadcast::channel(16);
        let relay = MessageRelay::new(db.clone(), tx);
        (relay, db, rx, SessionKey::new("acme", None))
    }

    fn connect(db: &Database, key: &SessionKey) {
        SessionRepo::new(db.clone())
            .upsert_connected(key, Some("972500000001"))
            .unwrap();
    }

    fn inbound(content: Option<&str>, from_me: bool) -> InboundMessage {
        InboundMessage {
            protocol_message_id: "3EB0".into(),
            chat_address: "972501234567@s.whatsapp.net".into(),
            from_address: "972501234567@s.whatsapp.net".into(),
            from_me,
            conversation: content.map(String::from),
            extended_text: None,
        }
    }

    #[test]
    fn inbound_persists_and_publishes() {
        let (relay, db, mut rx, key) = setup();
        connect(&db, &key);

        let record = relay.on_inbound(&key, inbound(Some("hello"), false)).unwrap();
        assert_eq!(record.content, "hello");
        assert_eq!(record.direction, Direction::Inbound);
        assert_eq!(record.delivery_status, DeliveryStatus::Received);
        assert_eq!(record.to_address, "972500000001");

        let listed = MessageRepo::new(db).list_for_client("acme", None, 50).unwrap();
        assert_eq!(listed.len(), 1);

        match rx.try_recv().unwrap() {
            SessionEvent::Message { key: evt_key, record: published } => {
                assert_eq!(evt_key.topic(), "acme-default");
                assert_eq!(published.id, record.id);
            }
            other => panic!("expected message event, got {other:?}"),
        }
    }

    #[test]
    fn inbound_self_echo_is_ignored() {
        let (relay, db, mut rx, key) = setup();
        connect(&db, &key);

        assert!(relay.on_inbound(&key, inbound(Some("echo"), true)).is_none());
        assert!(rx.try_recv().is_err());
        assert!(MessageRepo::new(db).list_for_client("acme", None, 50).unwrap().is_empty());
    }

    #[test]
    fn inbound_without_content_is_ignored() {
        let (relay, db, mut rx, key) = setup();
        connect(&db, &key);

        assert!(relay.on_inbound(&key, inbound(None, false)).is_none());
        assert!(relay.on_inbound(&key, inbound(Some(""), false)).is_none());
        assert!(rx.try_recv().is_err());
        assert!(MessageRepo::new(db).list_for_client("acme", None, 50).unwrap().is_empty());
    }

    #[test]
    fn inbound_dropped_when_session_row_missing() {
        let (relay, db, mut rx, key) = setup();
        // No session row created

        assert!(relay.on_inbound(&key, inbound(Some("orphan"), false)).is_none());
        assert!(rx.try_recv().is_err());
        assert!(MessageRepo::new(db).list_for_client("acme", None, 50).unwrap().is_empty());
    }

    #[test]
    fn outbound_persists_and_publishes() {
        let (relay, db, mut rx, key) = setup();
        connect(&db, &key);

        let sent = SentMessage { protocol_message_id: "mock-0".into() };
        let record = relay
            .record_outbound(&key, "972501234567@s.whatsapp.net", &sent, "hi", Some("lead-7".into()))
            .unwrap();
        assert_eq!(record.direction, Direction::Outbound);
        assert_eq!(record.delivery_status, DeliveryStatus::Sent);
        assert_eq!(record.from_address, "972500000001");
        assert_eq!(record.lead_id.as_deref(), Some("lead-7"));
        assert_eq!(record.protocol_message_id, "mock-0");

        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Message { .. }));
        let listed = MessageRepo::new(db).list_for_client("acme", Some("lead-7"), 50).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn outbound_drop_when_session_row_missing() {
        let (relay, _db, mut rx, key) = setup();

        let sent = SentMessage { protocol_message_id: "mock-0".into() };
        assert!(relay.record_outbound(&key, "addr", &sent, "hi", None).is_none());
        assert!(rx.try_recv().is_err());
    }
}
