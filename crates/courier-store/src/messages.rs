use chrono::Utc;
use tracing::instrument;

use courier_core::ids::{MessageId, SessionId};
use courier_core::messages::{DeliveryStatus, Direction, MessageRecord, MessageType};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Fields for a message about to be persisted. The repo assigns the id and
/// timestamp on insert.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub session_id: SessionId,
    pub lead_id: Option<String>,
    pub protocol_message_id: String,
    pub chat_address: String,
    pub from_address: String,
    pub to_address: String,
    pub message_type: MessageType,
    pub content: String,
    pub direction: Direction,
    pub delivery_status: DeliveryStatus,
}

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert one message row. Rows are immutable after insert.
    #[instrument(skip(self, msg), fields(session_id = %msg.session_id, direction = %msg.direction))]
    pub fn insert(&self, msg: NewMessage) -> Result<MessageRecord, StoreError> {
        let id = MessageId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, session_id, lead_id, protocol_message_id, chat_address,
                                       from_address, to_address, message_type, content, direction,
                                       delivery_status, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    id.as_str(),
                    msg.session_id.as_str(),
                    msg.lead_id,
                    msg.protocol_message_id,
                    msg.chat_address,
                    msg.from_address,
                    msg.to_address,
                    msg.message_type.to_string(),
                    msg.content,
                    msg.direction.to_string(),
                    msg.delivery_status.to_string(),
                    now,
                ],
            )?;

            Ok(MessageRecord {
                id,
                session_id: msg.session_id,
                lead_id: msg.lead_id,
                protocol_message_id: msg.protocol_message_id,
                chat_address: msg.chat_address,
                from_address: msg.from_address,
                to_address: msg.to_address,
                message_type: msg.message_type,
                content: msg.content,
                direction: msg.direction,
                delivery_status: msg.delivery_status,
                timestamp: now,
            })
        })
    }

    /// List messages across all of a client's sessions, newest first,
    /// optionally filtered by correlation tag.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub fn list_for_client(
        &self,
        client_id: &str,
        lead_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let (sql, params) = match lead_id {
                Some(lead) => (
                    "SELECT m.id, m.session_id, m.lead_id, m.protocol_message_id, m.chat_address,
                            m.from_address, m.to_address, m.message_type, m.content, m.direction,
                            m.delivery_status, m.timestamp
                     FROM messages m
                     JOIN sessions s ON m.session_id = s.id
                     WHERE s.client_id = ?1 AND m.lead_id = ?2
                     ORDER BY m.timestamp DESC LIMIT ?3",
                    vec![client_id.to_string(), lead.to_string(), limit.to_string()],
                ),
                None => (
                    "SELECT m.id, m.session_id, m.lead_id, m.protocol_message_id, m.chat_address,
                            m.from_address, m.to_address, m.message_type, m.content, m.direction,
                            m.delivery_status, m.timestamp
                     FROM messages m
                     JOIN sessions s ON m.session_id = s.id
                     WHERE s.client_id = ?1
                     ORDER BY m.timestamp DESC LIMIT ?2",
                    vec![client_id.to_string(), limit.to_string()],
                ),
            };

            let mut stmt = conn.prepare(sql)?;
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
            let mut rows = stmt.query(params_refs.as_slice())?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRecord, StoreError> {
    let type_str: String = row_helpers::get(row, 7, "messages", "message_type")?;
    let direction_str: String = row_helpers::get(row, 9, "messages", "direction")?;
    let status_str: String = row_helpers::get(row, 10, "messages", "delivery_status")?;

    Ok(MessageRecord {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, "messages", "session_id")?),
        lead_id: row_helpers::get_opt(row, 2, "messages", "lead_id")?,
        protocol_message_id: row_helpers::get(row, 3, "messages", "protocol_message_id")?,
        chat_address: row_helpers::get(row, 4, "messages", "chat_address")?,
        from_address: row_helpers::get(row, 5, "messages", "from_address")?,
        to_address: row_helpers::get(row, 6, "messages", "to_address")?,
        message_type: row_helpers::parse_enum(&type_str, "messages", "message_type")?,
        content: row_helpers::get(row, 8, "messages", "content")?,
        direction: row_helpers::parse_enum(&direction_str, "messages", "direction")?,
        delivery_status: row_helpers::parse_enum(&status_str, "messages", "delivery_status")?,
        timestamp: row_helpers::get(row, 11, "messages", "timestamp")?,
    })
}
