use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use courier_core::ids::SessionId;
use courier_core::session::{SessionKey, SessionStatus};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// One durable session row. Keyed by (client_id, session_name); mutated by
/// upsert on every status transition, never deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub client_id: String,
    pub session_name: String,
    pub status: SessionStatus,
    pub qr_code: Option<String>,
    pub phone_number: Option<String>,
    pub last_activity: String,
    pub created_at: String,
}

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a pending QR challenge: upsert (status=qr_ready, qr_code).
    #[instrument(skip(self, qr), fields(session_key = %key))]
    pub fn upsert_qr(&self, key: &SessionKey, qr: &str) -> Result<SessionRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, client_id, session_name, status, qr_code, last_activity, created_at)
                 VALUES (?1, ?2, ?3, 'qr_ready', ?4, ?5, ?5)
                 ON CONFLICT(client_id, session_name) DO UPDATE SET
                     status = 'qr_ready',
                     qr_code = excluded.qr_code,
                     last_activity = excluded.last_activity",
                rusqlite::params![SessionId::new().as_str(), key.client_id, key.session_name, qr, now],
            )?;
            select_by_key(conn, key)
        })
    }

    /// Record a successful connection: upsert (status=connected, phone
    /// number, qr cleared).
    #[instrument(skip(self), fields(session_key = %key))]
    pub fn upsert_connected(
        &self,
        key: &SessionKey,
        phone_number: Option<&str>,
    ) -> Result<SessionRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, client_id, session_name, status, phone_number, last_activity, created_at)
                 VALUES (?1, ?2, ?3, 'connected', ?4, ?5, ?5)
                 ON CONFLICT(client_id, session_name) DO UPDATE SET
                     status = 'connected',
                     phone_number = excluded.phone_number,
                     qr_code = NULL,
                     last_activity = excluded.last_activity",
                rusqlite::params![
                    SessionId::new().as_str(),
                    key.client_id,
                    key.session_name,
                    phone_number,
                    now,
                ],
            )?;
            select_by_key(conn, key)
        })
    }

    /// Mark a session disconnected and clear any pending QR. No-op when the
    /// row was never created.
    #[instrument(skip(self), fields(session_key = %key))]
    pub fn mark_disconnected(&self, key: &SessionKey) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET status = 'disconnected', qr_code = NULL, last_activity = ?1
                 WHERE client_id = ?2 AND session_name = ?3",
                rusqlite::params![now, key.client_id, key.session_name],
            )?;
            Ok(())
        })
    }

    /// Get a session row by its composite key.
    #[instrument(skip(self), fields(session_key = %key))]
    pub fn get_by_key(&self, key: &SessionKey) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| select_by_key(conn, key))
    }
}

fn select_by_key(conn: &rusqlite::Connection, key: &SessionKey) -> Result<SessionRow, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, client_id, session_name, status, qr_code, phone_number, last_activity, created_at
         FROM sessions WHERE client_id = ?1 AND session_name = ?2",
    )?;
    let mut rows = stmt.query(rusqlite::params![key.client_id, key.session_name])?;
    match rows.next()? {
        Some(row) => row_to_session(row),
        None => Err(StoreError::NotFound(format!("session {key}"))),
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    let status_str: String = row_helpers::get(row, 3, "sessions", "status")?;

    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        client_id: row_helpers::get(row, 1, "sessions", "client_id")?,
        session_name: row_helpers::get(row, 2, "sessions", "session_name")?,
        status: row_helpers::parse_enum(&status_str, "sessions", "status")?,
        qr_code: row_helpers::get_opt(row, 4, "sessions", "qr_code")?,
        phone_number: row_helpers::get_opt(row, 5, "sessions", "phone_number")?,
        last_activity: row_helpers::get(row, 6, "sessions", "last_activity")?,
        created_at: row_helpers::get(row, 7, "sessions", "created_at")?,
    })
}
