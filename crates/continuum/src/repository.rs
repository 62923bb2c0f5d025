//! Continuum and message persistence over the SQL substrate.
//!
//! Segment queries drive the session cache loader: collapsed summaries,
//! the active-segment sentinel, continuity turns, and the active tail.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use mnemon_domain::error::{Error, Result};
use mnemon_domain::message::{MessageContent, Role};

use crate::continuum::{Continuum, ContinuumMetadata, MessageMetadata, StoredMessage};

fn from_sql(e: rusqlite::Error) -> Error {
    Error::Sql(e.to_string())
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Sql(format!("bad timestamp '{s}': {e}")))
}

pub struct ContinuumRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ContinuumRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_schema(&conn.lock())?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Each user owns exactly one continuum; create it on first contact.
    pub fn get_or_create(&self, user_id: &str, segment_size_threshold: usize) -> Result<Continuum> {
        let conn = self.conn.lock();
        let existing = conn
            .query_row(
                "SELECT id, metadata_json, created_at FROM continuums WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(from_sql)?;

        if let Some((id, metadata_json, created_at)) = existing {
            let id = Uuid::parse_str(&id).map_err(|e| Error::Sql(e.to_string()))?;
            let metadata: ContinuumMetadata = serde_json::from_str(&metadata_json)?;
            return Ok(Continuum::new(
                id,
                user_id,
                metadata,
                parse_ts(&created_at)?,
                segment_size_threshold,
            ));
        }

        let continuum = Continuum::new(
            Uuid::new_v4(),
            user_id,
            ContinuumMetadata::default(),
            Utc::now(),
            segment_size_threshold,
        );
        conn.execute(
            "INSERT INTO continuums (id, user_id, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                continuum.id.to_string(),
                user_id,
                serde_json::to_string(&continuum.metadata)?,
                continuum.created_at.to_rfc3339(),
            ],
        )
        .map_err(from_sql)?;
        tracing::info!(user_id, continuum_id = %continuum.id, "continuum created");
        Ok(continuum)
    }

    /// Insert a message row (used inside the unit-of-work transaction).
    pub(crate) fn insert_message(
        conn: &Connection,
        continuum_id: Uuid,
        user_id: &str,
        message: &StoredMessage,
    ) -> Result<()> {
        if message.content.is_blank() {
            return Err(Error::Validation(
                "refusing to persist a blank message".into(),
            ));
        }
        conn.execute(
            "INSERT INTO messages
               (id, continuum_id, user_id, role, content_json, created_at,
                metadata_json, segment_boundary, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                continuum_id.to_string(),
                user_id,
                message.role.as_str(),
                serde_json::to_string(&message.content)?,
                message.created_at.to_rfc3339(),
                serde_json::to_string(&message.metadata)?,
                message.metadata.segment_boundary,
                message.metadata.status.map(|s| s.as_str()),
            ],
        )
        .map_err(from_sql)?;
        Ok(())
    }

    pub(crate) fn update_metadata(
        conn: &Connection,
        continuum_id: Uuid,
        metadata: &ContinuumMetadata,
    ) -> Result<()> {
        conn.execute(
            "UPDATE continuums SET metadata_json = ?1 WHERE id = ?2",
            params![serde_json::to_string(metadata)?, continuum_id.to_string()],
        )
        .map_err(from_sql)?;
        Ok(())
    }

    // ── Segment queries (session cache loader) ─────────────────────

    /// Most recent collapsed segment summaries, chronological order.
    pub fn find_collapsed_segments(
        &self,
        continuum_id: Uuid,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock();
        let mut messages = self.query_messages(
            &conn,
            "SELECT id, role, content_json, created_at, metadata_json
             FROM messages
             WHERE continuum_id = ?1 AND segment_boundary = 1 AND status = 'collapsed'
             ORDER BY created_at DESC LIMIT ?2",
            params![continuum_id.to_string(), limit as i64],
        )?;
        messages.reverse();
        Ok(messages)
    }

    /// The latest active-segment sentinel, if one exists.
    pub fn find_active_segment(&self, continuum_id: Uuid) -> Result<Option<StoredMessage>> {
        let conn = self.conn.lock();
        let mut messages = self.query_messages(
            &conn,
            "SELECT id, role, content_json, created_at, metadata_json
             FROM messages
             WHERE continuum_id = ?1 AND segment_boundary = 1 AND status = 'active'
             ORDER BY created_at DESC LIMIT 1",
            params![continuum_id.to_string()],
        )?;
        Ok(messages.pop())
    }

    /// All non-sentinel messages after a point in time, chronological.
    pub fn load_segment_messages(
        &self,
        continuum_id: Uuid,
        after: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock();
        self.query_messages(
            &conn,
            "SELECT id, role, content_json, created_at, metadata_json
             FROM messages
             WHERE continuum_id = ?1 AND segment_boundary = 0 AND created_at > ?2
             ORDER BY created_at ASC",
            params![continuum_id.to_string(), after.to_rfc3339()],
        )
    }

    /// The last `turn_count` user→assistant pairs before the active
    /// sentinel (or before the end of history when no sentinel exists),
    /// chronological order.
    pub fn load_continuity_messages(
        &self,
        continuum_id: Uuid,
        turn_count: usize,
    ) -> Result<Vec<StoredMessage>> {
        let boundary_ts = self
            .find_active_segment(continuum_id)?
            .map(|m| m.created_at.to_rfc3339())
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        let conn = self.conn.lock();
        let recent = self.query_messages(
            &conn,
            "SELECT id, role, content_json, created_at, metadata_json
             FROM messages
             WHERE continuum_id = ?1 AND segment_boundary = 0 AND created_at < ?2
               AND role IN ('user', 'assistant')
             ORDER BY created_at DESC LIMIT ?3",
            params![
                continuum_id.to_string(),
                boundary_ts,
                (turn_count * 4) as i64
            ],
        )?;

        // Walk the reversed tail pairing assistant messages with their
        // preceding user message.
        let mut pairs: Vec<(StoredMessage, StoredMessage)> = Vec::new();
        let mut iter = recent.into_iter().peekable();
        while pairs.len() < turn_count {
            let Some(assistant) = iter.find(|m| m.role == Role::Assistant) else {
                break;
            };
            let Some(user) = iter.find(|m| m.role == Role::User) else {
                break;
            };
            pairs.push((user, assistant));
        }

        let mut messages = Vec::with_capacity(pairs.len() * 2);
        for (user, assistant) in pairs.into_iter().rev() {
            messages.push(user);
            messages.push(assistant);
        }
        Ok(messages)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn query_messages(
        &self,
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = conn.prepare(sql).map_err(from_sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(from_sql)?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, role, content_json, created_at, metadata_json) = row.map_err(from_sql)?;
            let content: MessageContent = serde_json::from_str(&content_json)?;
            let metadata: MessageMetadata = serde_json::from_str(&metadata_json)?;
            messages.push(StoredMessage {
                id: Uuid::parse_str(&id).map_err(|e| Error::Sql(e.to_string()))?,
                role: role.parse()?,
                content,
                created_at: parse_ts(&created_at)?,
                metadata,
            });
        }
        Ok(messages)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS continuums (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            metadata_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            continuum_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            metadata_json TEXT NOT NULL,
            segment_boundary INTEGER NOT NULL DEFAULT 0,
            status TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_messages_user_time ON messages(user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_continuum_time ON messages(continuum_id, created_at);",
    )
    .map_err(from_sql)
}
