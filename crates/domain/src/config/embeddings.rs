use serde::{Deserialize, Serialize};

/// Encoder/reranker service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Base URL of the encoder service.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// TTL for single-text embedding cache entries.
    #[serde(default = "d_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Whether the cross-encoder reranker is deployed alongside the encoder.
    #[serde(default = "d_true")]
    pub enable_reranker: bool,
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            cache_ttl_secs: d_cache_ttl(),
            enable_reranker: true,
            timeout_secs: d_timeout(),
        }
    }
}

fn d_base_url() -> String {
    "http://localhost:8090".into()
}
fn d_cache_ttl() -> u64 {
    900
}
fn d_timeout() -> u64 {
    30
}
fn d_true() -> bool {
    true
}
