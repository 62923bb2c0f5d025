use serde::{Deserialize, Serialize};

/// Domain-knowledge block buffering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Refresh the enabled block's content every N completed turns.
    #[serde(default = "d_batch")]
    pub message_batch_size: u32,
    /// TTL for the in-process block content cache.
    #[serde(default = "d_ttl")]
    pub block_cache_ttl_secs: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            message_batch_size: d_batch(),
            block_cache_ttl_secs: d_ttl(),
        }
    }
}

fn d_batch() -> u32 {
    5
}
fn d_ttl() -> u64 {
    300
}
