/// SQLite-backed durable session store.
///
/// Sessions live in `chat_sessions`, turns in `chat_messages`. Timestamps are
/// stored as Unix milliseconds; message ids are autoincrementing so creation
/// order survives identical timestamps.
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use flowchat_core::{Clock, Role, Session, StoredMessage, SystemClock};

use crate::store::{DEFAULT_MAX_HISTORY, SessionStore};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS chat_sessions (
        id          TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS chat_messages (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id  TEXT NOT NULL,
        role        TEXT NOT NULL,
        content     TEXT NOT NULL,
        created_at  INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, id);
    CREATE INDEX IF NOT EXISTS idx_chat_sessions_updated ON chat_sessions(updated_at);";

pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    max_history: usize,
}

impl SqliteSessionStore {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).context("Failed to open SQLite session database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL journal")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize chat schema")?;

        info!("SqliteSessionStore opened at {:?}", path.as_ref());
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn open(&self, workflow_id: &str, session_id: Option<&str>) -> Result<Session> {
        let now = self.clock.now();
        let conn = self.conn.lock().await;

        if let Some(id) = session_id {
            let existing = conn
                .query_row(
                    "SELECT id, workflow_id, created_at, updated_at FROM chat_sessions
                     WHERE id = ?1 AND workflow_id = ?2",
                    params![id, workflow_id],
                    row_to_session,
                )
                .optional()?;
            if let Some(mut session) = existing {
                conn.execute(
                    "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
                    params![now.timestamp_millis(), id],
                )?;
                session.updated_at = now;
                return Ok(session);
            }
            debug!(requested = %id, "Session did not resolve, creating a new one");
        }

        let session = Session::new(workflow_id, now);
        conn.execute(
            "INSERT INTO chat_sessions (id, workflow_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                session.id,
                session.workflow_id,
                session.created_at.timestamp_millis(),
                session.updated_at.timestamp_millis(),
            ],
        )
        .context("Failed to record new session")?;
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().await;
        let session = conn
            .query_row(
                "SELECT id, workflow_id, created_at, updated_at FROM chat_sessions WHERE id = ?1",
                params![session_id],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    async fn append(&self, session_id: &str, role: Role, content: &str) -> Result<StoredMessage> {
        let now = self.clock.now();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
            params![now.timestamp_millis(), session_id],
        )?;
        if updated == 0 {
            anyhow::bail!("unknown session {session_id}");
        }

        tx.execute(
            "INSERT INTO chat_messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role.as_str(), content, now.timestamp_millis()],
        )?;
        let id = tx.last_insert_rowid();

        let trimmed = tx.execute(
            "DELETE FROM chat_messages
             WHERE session_id = ?1
               AND id NOT IN (
                   SELECT id FROM chat_messages WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2
               )",
            params![session_id, self.max_history as i64],
        )?;
        tx.commit()?;

        if trimmed > 0 {
            debug!(session_id, trimmed, "Evicted oldest messages");
        }
        Ok(StoredMessage {
            id,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        })
    }

    async fn history(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, created_at FROM (
                 SELECT id, session_id, role, content, created_at FROM chat_messages
                 WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2
             ) ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id, self.max_history as i64], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn purge_inactive(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let cutoff = older_than.timestamp_millis();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let messages = tx.execute(
            "DELETE FROM chat_messages WHERE session_id IN
                 (SELECT id FROM chat_sessions WHERE updated_at < ?1)",
            params![cutoff],
        )?;
        let sessions = tx.execute("DELETE FROM chat_sessions WHERE updated_at < ?1", params![cutoff])?;
        tx.commit()?;
        info!(sessions, messages, "Purged inactive chat sessions");
        Ok(sessions)
    }

    fn max_history(&self) -> usize {
        self.max_history
    }
}

// ---------------------------------------------------------------------------
// Row deserialization helpers
// ---------------------------------------------------------------------------

fn millis_to_datetime(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| rusqlite::Error::InvalidParameterName(format!("timestamp out of range: {ms}")))
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        created_at: millis_to_datetime(row.get(2)?)?,
        updated_at: millis_to_datetime(row.get(3)?)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get(2)?;
    let role = Role::parse(&role)
        .ok_or_else(|| rusqlite::Error::InvalidParameterName(format!("unknown role {role}")))?;
    Ok(StoredMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role,
        content: row.get(3)?,
        created_at: millis_to_datetime(row.get(4)?)?,
    })
}
