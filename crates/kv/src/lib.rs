//! KV substrate wrapper.
//!
//! One thin client over redis used for three concerns, each with its own
//! key namespace: embedding cache (`embedding_384:` / `embedding_1024:`),
//! per-user request locks (`user_req_lock:`), and deferred context results
//! (`context_search:`). Callers own their key layout; this crate owns
//! connection management and error mapping.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use mnemon_domain::error::{Error, Result};

fn from_redis(e: redis::RedisError) -> Error {
    Error::Kv(e.to_string())
}

/// Cloneable async KV client. The underlying connection manager handles
/// reconnects.
#[derive(Clone)]
pub struct KvStore {
    conn: ConnectionManager,
}

impl KvStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(from_redis)?;
        let conn = client.get_connection_manager().await.map_err(from_redis)?;
        tracing::info!(url, "KV store connected");
        Ok(Self { conn })
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(from_redis)
    }

    pub async fn set_bytes_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl_secs).await.map_err(from_redis)
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(from_redis)
    }

    pub async fn set_string_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl_secs).await.map_err(from_redis)
    }

    /// `SET key value NX EX ttl` — returns true when the key was set (the
    /// lock was acquired), false when it already existed.
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(from_redis)?;
        Ok(outcome.is_some())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del(key).await.map_err(from_redis)
    }
}
