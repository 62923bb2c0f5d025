//! Per-user request lock over the KV substrate.
//!
//! `SET key NX EX 60` to acquire, `DEL` to release. Holding the lock for
//! the whole connection serializes turns per user; the TTL guarantees
//! eventual release if a holder crashes without releasing.

use mnemon_domain::error::Result;
use mnemon_kv::KvStore;

const LOCK_TTL_SECS: u64 = 60;

pub struct UserRequestLock {
    kv: KvStore,
}

impl UserRequestLock {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    fn key(user_id: &str) -> String {
        format!("user_req_lock:{user_id}")
    }

    /// Non-blocking acquire. The stored value is the connection id, which
    /// makes a stuck lock attributable.
    pub async fn acquire(&self, user_id: &str, connection_id: &str) -> Result<bool> {
        let acquired = self
            .kv
            .set_nx_ex(&Self::key(user_id), connection_id, LOCK_TTL_SECS)
            .await?;
        if acquired {
            tracing::debug!(user_id, connection_id, "user request lock acquired");
        } else {
            tracing::warn!(user_id, connection_id, "user request lock busy");
        }
        Ok(acquired)
    }

    pub async fn release(&self, user_id: &str) {
        if let Err(e) = self.kv.delete(&Self::key(user_id)).await {
            // The TTL will clean it up; nothing else to do.
            tracing::warn!(user_id, error = %e, "failed to release user request lock");
        }
    }
}
