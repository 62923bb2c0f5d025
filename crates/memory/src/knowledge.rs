//! Domain-knowledge blocks: named context payloads a user can enable one
//! at a time. The enabled block's content is injected into the system
//! prompt by its trinket; content refreshes are batched across turns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mnemon_domain::config::KnowledgeConfig;
use mnemon_domain::error::{Error, Result};

use crate::store::{from_sql, parse_ts};

/// A registered block (content lives in a separate table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBlock {
    pub id: Uuid,
    pub user_id: String,
    pub label: String,
    pub description: String,
    pub agent_ref: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

struct CachedContent {
    value: String,
    fetched_at: Instant,
}

pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    config: KnowledgeConfig,
    /// Per-user cache of the enabled block's content.
    content_cache: RwLock<HashMap<String, CachedContent>>,
    /// Per-user completed-turn counters for batched refresh.
    turn_counters: Mutex<HashMap<String, u32>>,
}

fn valid_label(label: &str) -> bool {
    !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !label.starts_with('_')
}

impl KnowledgeStore {
    pub fn new(conn: Arc<Mutex<Connection>>, config: KnowledgeConfig) -> Result<Self> {
        init_schema(&conn.lock())?;
        Ok(Self {
            conn,
            config,
            content_cache: RwLock::new(HashMap::new()),
            turn_counters: Mutex::new(HashMap::new()),
        })
    }

    pub fn create_block(
        &self,
        user_id: &str,
        label: &str,
        description: &str,
        agent_ref: Option<&str>,
    ) -> Result<KnowledgeBlock> {
        if !valid_label(label) {
            return Err(Error::Validation(format!(
                "block label must be snake_case, got '{label}'"
            )));
        }
        let block = KnowledgeBlock {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            label: label.to_string(),
            description: description.to_string(),
            agent_ref: agent_ref.map(str::to_string),
            enabled: false,
            created_at: Utc::now(),
        };
        self.conn
            .lock()
            .execute(
                "INSERT INTO domain_knowledge_blocks
                   (id, user_id, label, description, agent_ref, enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![
                    block.id.to_string(),
                    block.user_id,
                    block.label,
                    block.description,
                    block.agent_ref,
                    block.created_at.to_rfc3339(),
                ],
            )
            .map_err(from_sql)?;
        Ok(block)
    }

    /// Enable a block. Fails, leaving the store unchanged, if another block
    /// is already enabled for this user.
    pub fn enable(&self, user_id: &str, label: &str) -> Result<()> {
        let conn = self.conn.lock();

        let already: Option<String> = conn
            .query_row(
                "SELECT label FROM domain_knowledge_blocks
                 WHERE user_id = ?1 AND enabled = 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(from_sql)?;

        if let Some(existing) = already {
            if existing == label {
                return Ok(());
            }
            return Err(Error::Validation(format!(
                "block '{existing}' is already enabled; disable it before enabling '{label}'"
            )));
        }

        let changed = conn
            .execute(
                "UPDATE domain_knowledge_blocks SET enabled = 1
                 WHERE user_id = ?1 AND label = ?2",
                params![user_id, label],
            )
            .map_err(from_sql)?;
        if changed == 0 {
            return Err(Error::Validation(format!("no block named '{label}'")));
        }
        self.content_cache.write().remove(user_id);
        Ok(())
    }

    pub fn disable(&self, user_id: &str, label: &str) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "UPDATE domain_knowledge_blocks SET enabled = 0
                 WHERE user_id = ?1 AND label = ?2",
                params![user_id, label],
            )
            .map_err(from_sql)?;
        self.content_cache.write().remove(user_id);
        Ok(())
    }

    pub fn enabled_block(&self, user_id: &str) -> Result<Option<KnowledgeBlock>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, user_id, label, description, agent_ref, enabled, created_at
             FROM domain_knowledge_blocks
             WHERE user_id = ?1 AND enabled = 1",
            params![user_id],
            row_to_block,
        )
        .optional()
        .map_err(from_sql)?
        .transpose()
    }

    /// Store synced content for a block.
    pub fn sync_content(&self, block_id: Uuid, value: &str) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO domain_knowledge_block_content (block_id, block_value, synced_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (block_id) DO UPDATE
                   SET block_value = excluded.block_value, synced_at = excluded.synced_at",
                params![block_id.to_string(), value, Utc::now().to_rfc3339()],
            )
            .map_err(from_sql)?;
        self.content_cache.write().clear();
        Ok(())
    }

    /// The enabled block plus its content, served from the TTL cache when
    /// fresh.
    pub fn enabled_content(&self, user_id: &str) -> Result<Option<(KnowledgeBlock, String)>> {
        let Some(block) = self.enabled_block(user_id)? else {
            return Ok(None);
        };

        let ttl = Duration::from_secs(self.config.block_cache_ttl_secs);
        if let Some(cached) = self.content_cache.read().get(user_id) {
            if cached.fetched_at.elapsed() < ttl {
                return Ok(Some((block, cached.value.clone())));
            }
        }

        let value: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT block_value FROM domain_knowledge_block_content WHERE block_id = ?1",
                params![block.id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(from_sql)?;

        let Some(value) = value else {
            return Ok(None);
        };
        self.content_cache.write().insert(
            user_id.to_string(),
            CachedContent {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(Some((block, value)))
    }

    /// Count a completed turn; every `message_batch_size` turns the content
    /// cache is dropped so the next composition re-reads synced content.
    pub fn note_turn_completed(&self, user_id: &str) {
        let mut counters = self.turn_counters.lock();
        let counter = counters.entry(user_id.to_string()).or_insert(0);
        *counter += 1;
        if *counter >= self.config.message_batch_size {
            *counter = 0;
            drop(counters);
            self.content_cache.write().remove(user_id);
            tracing::debug!(user_id, "knowledge block cache invalidated after turn batch");
        }
    }
}

fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<KnowledgeBlock>> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let label: String = row.get(2)?;
    let description: String = row.get(3)?;
    let agent_ref: Option<String> = row.get(4)?;
    let enabled: bool = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok((|| {
        Ok(KnowledgeBlock {
            id: Uuid::parse_str(&id).map_err(|e| Error::Sql(e.to_string()))?,
            user_id,
            label,
            description,
            agent_ref,
            enabled,
            created_at: parse_ts(&created_at)?,
        })
    })())
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS domain_knowledge_blocks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            label TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            agent_ref TEXT,
            enabled INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE (user_id, label)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_one_enabled_block
            ON domain_knowledge_blocks(user_id) WHERE enabled = 1;

        CREATE TABLE IF NOT EXISTS domain_knowledge_block_content (
            block_id TEXT PRIMARY KEY,
            block_value TEXT NOT NULL,
            synced_at TEXT NOT NULL
        );",
    )
    .map_err(from_sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> KnowledgeStore {
        let conn = Connection::open_in_memory().unwrap();
        KnowledgeStore::new(
            Arc::new(Mutex::new(conn)),
            KnowledgeConfig {
                message_batch_size: 2,
                block_cache_ttl_secs: 300,
            },
        )
        .unwrap()
    }

    #[test]
    fn label_must_be_snake_case() {
        let store = test_store();
        assert!(store.create_block("u1", "Work Stuff", "", None).is_err());
        assert!(store.create_block("u1", "work-stuff", "", None).is_err());
        assert!(store.create_block("u1", "", "", None).is_err());
        assert!(store.create_block("u1", "michigan_trip", "trip notes", None).is_ok());
    }

    #[test]
    fn at_most_one_enabled_block_per_user() {
        let store = test_store();
        store.create_block("u1", "work", "", None).unwrap();
        store.create_block("u1", "michigan_trip", "", None).unwrap();

        store.enable("u1", "work").unwrap();
        let err = store.enable("u1", "michigan_trip").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // The original block is still the enabled one.
        let enabled = store.enabled_block("u1").unwrap().unwrap();
        assert_eq!(enabled.label, "work");
    }

    #[test]
    fn re_enabling_the_same_block_is_idempotent() {
        let store = test_store();
        store.create_block("u1", "work", "", None).unwrap();
        store.enable("u1", "work").unwrap();
        store.enable("u1", "work").unwrap();
    }

    #[test]
    fn disable_then_enable_other() {
        let store = test_store();
        store.create_block("u1", "work", "", None).unwrap();
        store.create_block("u1", "home", "", None).unwrap();
        store.enable("u1", "work").unwrap();
        store.disable("u1", "work").unwrap();
        store.enable("u1", "home").unwrap();
        assert_eq!(store.enabled_block("u1").unwrap().unwrap().label, "home");
    }

    #[test]
    fn enabled_blocks_are_independent_across_users() {
        let store = test_store();
        store.create_block("u1", "work", "", None).unwrap();
        store.create_block("u2", "work", "", None).unwrap();
        store.enable("u1", "work").unwrap();
        store.enable("u2", "work").unwrap();
    }

    #[test]
    fn content_sync_and_read() {
        let store = test_store();
        let block = store.create_block("u1", "work", "office context", None).unwrap();
        store.enable("u1", "work").unwrap();

        assert!(store.enabled_content("u1").unwrap().is_none());

        store.sync_content(block.id, "Q3 roadmap details").unwrap();
        let (loaded, value) = store.enabled_content("u1").unwrap().unwrap();
        assert_eq!(loaded.label, "work");
        assert_eq!(value, "Q3 roadmap details");
    }

    #[test]
    fn enabling_unknown_block_fails() {
        let store = test_store();
        let err = store.enable("u1", "ghost").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
