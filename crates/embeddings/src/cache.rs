//! KV-backed embedding cache.
//!
//! Entries are keyed by `{prefix}:{sha256(text)}` and stored as fp16
//! little-endian bytes with a short TTL. Only single-text encodes are
//! cached; batch calls bypass this layer entirely.

use half::f16;
use sha2::{Digest, Sha256};

use mnemon_domain::error::Result;
use mnemon_kv::KvStore;

pub(crate) fn cache_key(prefix: &str, text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{prefix}:{}", hex::encode(digest))
}

pub(crate) fn to_fp16_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 2);
    for &v in vector {
        bytes.extend_from_slice(&f16::from_f32(v).to_le_bytes());
    }
    bytes
}

pub(crate) fn from_fp16_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f16::from_le_bytes([pair[0], pair[1]]).to_f32())
        .collect()
}

/// Per-model embedding cache (distinct prefixes keep the 384-dim and
/// 1024-dim spaces from colliding).
pub(crate) struct EmbeddingCache {
    kv: KvStore,
    prefix: &'static str,
    ttl_secs: u64,
}

impl EmbeddingCache {
    pub fn new(kv: KvStore, prefix: &'static str, ttl_secs: u64) -> Self {
        Self { kv, prefix, ttl_secs }
    }

    pub async fn get(&self, text: &str, expected_dim: usize) -> Result<Option<Vec<f32>>> {
        let key = cache_key(self.prefix, text);
        match self.kv.get_bytes(&key).await? {
            Some(bytes) if bytes.len() == expected_dim * 2 => Ok(Some(from_fp16_bytes(&bytes))),
            Some(_) => {
                tracing::warn!(key = %key, "cached embedding has wrong length, ignoring");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn set(&self, text: &str, vector: &[f32]) -> Result<()> {
        let key = cache_key(self.prefix, text);
        self.kv
            .set_bytes_ex(&key, &to_fp16_bytes(vector), self.ttl_secs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_prefix_plus_sha256() {
        let key = cache_key("embedding_384", "hello");
        assert!(key.starts_with("embedding_384:"));
        // sha256 hex digest is 64 chars
        assert_eq!(key.len(), "embedding_384:".len() + 64);
        // Deterministic
        assert_eq!(key, cache_key("embedding_384", "hello"));
        assert_ne!(key, cache_key("embedding_384", "hello!"));
    }

    #[test]
    fn fp16_round_trip_stays_close() {
        let original: Vec<f32> = (0..384).map(|i| (i as f32 / 384.0) - 0.5).collect();
        let bytes = to_fp16_bytes(&original);
        assert_eq!(bytes.len(), 384 * 2);
        let recovered = from_fp16_bytes(&bytes);
        assert_eq!(recovered.len(), 384);
        for (a, b) in original.iter().zip(&recovered) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }
}
