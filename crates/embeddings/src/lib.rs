//! Embedding and reranker client.
//!
//! Wraps the external encoder service behind three operations:
//! [`EmbeddingsClient::encode_fast`] (384-dim, low latency — queries,
//! classification, memory storage), [`EmbeddingsClient::encode_deep`]
//! (1024-dim — long-form retrieval), and [`EmbeddingsClient::rerank`]
//! (cross-encoder). The reranker is optional; callers branch on
//! [`EmbeddingsClient::reranker_available`] rather than probing.

mod cache;

use serde::Deserialize;

use mnemon_domain::config::EmbeddingsConfig;
use mnemon_domain::error::{Error, Result};
use mnemon_kv::KvStore;

use cache::EmbeddingCache;

pub const FAST_DIM: usize = 384;
pub const DEEP_DIM: usize = 1024;

/// One reranked passage: original index, relevance score, passage text.
#[derive(Debug, Clone)]
pub struct Reranked {
    pub index: usize,
    pub score: f32,
    pub passage: String,
}

pub struct EmbeddingsClient {
    base_url: String,
    client: reqwest::Client,
    fast_cache: Option<EmbeddingCache>,
    deep_cache: Option<EmbeddingCache>,
    enable_reranker: bool,
}

#[derive(Deserialize)]
struct EncodeResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankEntry>,
}

#[derive(Deserialize)]
struct RerankEntry {
    index: usize,
    score: f32,
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// L2-normalize in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

impl EmbeddingsClient {
    /// Build the client. Passing a KV store enables the single-text cache;
    /// `None` disables caching (tests, offline tools).
    pub fn new(config: &EmbeddingsConfig, kv: Option<KvStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        let (fast_cache, deep_cache) = match kv {
            Some(kv) => (
                Some(EmbeddingCache::new(
                    kv.clone(),
                    "embedding_384",
                    config.cache_ttl_secs,
                )),
                Some(EmbeddingCache::new(
                    kv,
                    "embedding_1024",
                    config.cache_ttl_secs,
                )),
            ),
            None => (None, None),
        };

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            fast_cache,
            deep_cache,
            enable_reranker: config.enable_reranker,
        })
    }

    /// Whether cross-encoder reranking can be used.
    pub fn reranker_available(&self) -> bool {
        self.enable_reranker
    }

    /// Fast 384-dim embedding for a single text (KV-cached).
    pub async fn encode_fast(&self, text: &str) -> Result<Vec<f32>> {
        self.encode_single(text, "fast", FAST_DIM, self.fast_cache.as_ref())
            .await
    }

    /// Fast 384-dim embeddings for a batch (not cached).
    pub async fn encode_fast_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.encode_batch(texts, "fast", FAST_DIM).await
    }

    /// Deep 1024-dim embedding for a single text (KV-cached).
    pub async fn encode_deep(&self, text: &str) -> Result<Vec<f32>> {
        self.encode_single(text, "deep", DEEP_DIM, self.deep_cache.as_ref())
            .await
    }

    /// Deep 1024-dim embeddings for a batch (not cached).
    pub async fn encode_deep_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.encode_batch(texts, "deep", DEEP_DIM).await
    }

    /// Cross-encoder rerank: returns `(index, score, passage)` entries
    /// sorted by relevance, truncated to `top_k`.
    pub async fn rerank(
        &self,
        query: &str,
        passages: &[String],
        top_k: usize,
    ) -> Result<Vec<Reranked>> {
        if !self.enable_reranker {
            return Err(Error::Logic(
                "reranker not available; check reranker_available() first".into(),
            ));
        }
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/rerank", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "query": query, "passages": passages }))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let parsed: RerankResponse = resp.json().await.map_err(from_reqwest)?;
        Ok(rank_entries(parsed.results, passages, top_k))
    }

    // ── Internal helpers ───────────────────────────────────────────

    async fn encode_single(
        &self,
        text: &str,
        model: &str,
        dim: usize,
        cache: Option<&EmbeddingCache>,
    ) -> Result<Vec<f32>> {
        if let Some(cache) = cache {
            if let Some(hit) = cache.get(text, dim).await? {
                return Ok(hit);
            }
        }

        let mut vectors = self.encode_batch(&[text.to_string()], model, dim).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| Error::Upstream {
                status: 200,
                message: "encoder returned no embeddings".into(),
            })?;

        if let Some(cache) = cache {
            // Cache write failures shouldn't fail the encode.
            if let Err(e) = cache.set(text, &vector).await {
                tracing::warn!(error = %e, "embedding cache write failed");
            }
        }

        Ok(vector)
    }

    async fn encode_batch(
        &self,
        texts: &[String],
        model: &str,
        dim: usize,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/encode", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "texts": texts, "model": model }))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let parsed: EncodeResponse = resp.json().await.map_err(from_reqwest)?;
        if parsed.embeddings.len() != texts.len() {
            return Err(Error::Upstream {
                status: 200,
                message: format!(
                    "encoder returned {} embeddings for {} texts",
                    parsed.embeddings.len(),
                    texts.len()
                ),
            });
        }

        let mut out = Vec::with_capacity(parsed.embeddings.len());
        for mut vector in parsed.embeddings {
            if vector.len() != dim {
                return Err(Error::Validation(format!(
                    "expected {dim}-dim embedding, got {}",
                    vector.len()
                )));
            }
            l2_normalize(&mut vector);
            out.push(vector);
        }
        Ok(out)
    }
}

/// Sort rerank entries by score descending and attach passage text.
fn rank_entries(mut entries: Vec<RerankEntry>, passages: &[String], top_k: usize) -> Vec<Reranked> {
    entries.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    entries
        .into_iter()
        .filter(|e| e.index < passages.len())
        .take(top_k)
        .map(|e| Reranked {
            index: e.index,
            score: e.score,
            passage: passages[e.index].clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_produces_unit_vectors() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector() {
        let mut v = vec![0.0; 8];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn rank_entries_sorts_and_truncates() {
        let passages: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        let entries = vec![
            RerankEntry { index: 0, score: 0.2 },
            RerankEntry { index: 2, score: 0.9 },
            RerankEntry { index: 1, score: 0.5 },
        ];
        let ranked = rank_entries(entries, &passages, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].index, 2);
        assert_eq!(ranked[0].passage, "c");
        assert_eq!(ranked[1].index, 1);
    }

    #[test]
    fn rank_entries_drops_out_of_range_indices() {
        let passages: Vec<String> = vec!["only".into()];
        let entries = vec![
            RerankEntry { index: 5, score: 0.9 },
            RerankEntry { index: 0, score: 0.1 },
        ];
        let ranked = rank_entries(entries, &passages, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].index, 0);
    }
}
