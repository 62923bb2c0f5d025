//! Proactive retrieval: the central query that turns a fingerprint
//! embedding and a touchstone into a ranked, link-expanded memory tree.

use std::sync::Arc;

use uuid::Uuid;

use mnemon_domain::config::RetrievalConfig;
use mnemon_domain::error::{Error, Result};
use mnemon_domain::touchstone::Touchstone;
use mnemon_embeddings::EmbeddingsClient;

use crate::store::MemoryStore;
use crate::types::{LinkMetadata, Memory, SearchIntent, SurfacedMemory};

/// Links below this confidence never surface.
const MIN_LINK_CONFIDENCE: f32 = 0.6;

pub struct RetrievalEngine {
    store: Arc<MemoryStore>,
    embeddings: Arc<EmbeddingsClient>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<MemoryStore>,
        embeddings: Arc<EmbeddingsClient>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            config,
        }
    }

    /// Search with a pre-computed 384-dim embedding.
    ///
    /// Pipeline: derive intent from the touchstone, enhance the query with
    /// its semantic hooks, oversample a hybrid search, filter by
    /// importance, expand and rerank linked memories, then (when a
    /// cross-encoder is deployed) rerank the primaries against the
    /// touchstone context.
    pub async fn search_with_embedding(
        &self,
        user_id: &str,
        embedding: &[f32],
        touchstone: &Touchstone,
        query_text: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SurfacedMemory>> {
        if embedding.is_empty() {
            return Err(Error::Validation("search embedding is required".into()));
        }
        let limit = limit.unwrap_or(self.config.max_memories);

        let intent = SearchIntent::from_conversational_intent(&touchstone.conversational_intent);
        let enhanced_query = if touchstone.semantic_hooks.is_empty() {
            query_text.to_string()
        } else {
            format!("{query_text} {}", touchstone.semantic_hooks.join(" "))
        };

        tracing::debug!(
            user_id,
            ?intent,
            hooks = touchstone.semantic_hooks.len(),
            "hybrid memory search"
        );

        let search_results = self.store.hybrid_search(
            user_id,
            &enhanced_query,
            embedding,
            intent,
            limit * 2, // oversample for the importance filter
            self.config.similarity_threshold,
            self.config.min_importance_score,
        )?;

        let primaries: Vec<Memory> = search_results
            .into_iter()
            .filter(|m| m.importance >= self.config.min_importance_score)
            .take(limit)
            .collect();

        if primaries.is_empty() {
            tracing::debug!(user_id, "no relevant memories found");
            return Ok(Vec::new());
        }

        let mut surfaced = self.expand_links(&primaries)?;

        if self.embeddings.reranker_available() {
            surfaced = self
                .cross_encoder_rerank(surfaced, touchstone, query_text, limit)
                .await?;
        } else {
            surfaced.truncate(limit);
        }

        tracing::info!(
            user_id,
            surfaced = surfaced.len(),
            "memory retrieval complete"
        );
        Ok(surfaced)
    }

    // ── Link expansion and reranking ───────────────────────────────

    /// Attach linked memories to each primary and rerank them by
    /// `type_weight × inherited_importance × confidence`, where
    /// `inherited_importance = 0.7·linked + 0.3·primary`. Low-confidence
    /// links and links that duplicate a primary are dropped.
    fn expand_links(&self, primaries: &[Memory]) -> Result<Vec<SurfacedMemory>> {
        let primary_ids: std::collections::HashSet<Uuid> =
            primaries.iter().map(|m| m.id).collect();

        let mut surfaced = Vec::with_capacity(primaries.len());
        for primary in primaries {
            let mut root = SurfacedMemory::from_memory(primary);
            let traversed = self
                .store
                .traverse_links(primary.id, self.config.max_link_traversal_depth)?;

            let mut scored: Vec<(SurfacedMemory, f32)> = Vec::new();
            for link in traversed {
                if primary_ids.contains(&link.memory.id) {
                    continue;
                }
                if link.confidence < MIN_LINK_CONFIDENCE {
                    continue;
                }

                let inherited = 0.7 * link.memory.importance + 0.3 * primary.importance;
                let score = link.link_type.weight() * inherited * link.confidence;

                let mut child = SurfacedMemory::from_memory(&link.memory);
                child.link_metadata = Some(LinkMetadata {
                    link_type: link.link_type,
                    confidence: link.confidence,
                    reasoning: link.reasoning,
                    depth: link.depth,
                    linked_from_id: link.linked_from_id,
                });
                scored.push((child, score));
            }

            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            root.linked_memories = scored.into_iter().map(|(m, _)| m).collect();
            surfaced.push(root);
        }

        Ok(surfaced)
    }

    /// Cross-encoder pass over the primaries, keyed on the touchstone's
    /// temporal, relational, and narrative context.
    async fn cross_encoder_rerank(
        &self,
        surfaced: Vec<SurfacedMemory>,
        touchstone: &Touchstone,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<SurfacedMemory>> {
        let mut context_parts = Vec::new();
        if !touchstone.temporal_context.is_empty() {
            context_parts.push(format!("Timeline: {}", touchstone.temporal_context));
        }
        if !touchstone.relationship_context.is_empty() {
            context_parts.push(format!("About user: {}", touchstone.relationship_context));
        }
        context_parts.push(format!("Context: {}", touchstone.narrative));
        context_parts.push(format!("Current focus: {query_text}"));
        let rerank_context = context_parts.join("\n");

        let passages: Vec<String> = surfaced.iter().map(|m| m.text.clone()).collect();
        let ranked = self
            .embeddings
            .rerank(&rerank_context, &passages, limit)
            .await?;

        let mut by_index: Vec<Option<SurfacedMemory>> = surfaced.into_iter().map(Some).collect();
        let mut reranked = Vec::with_capacity(ranked.len());
        for entry in ranked {
            if let Some(memory) = by_index[entry.index].take() {
                reranked.push(memory);
            }
        }
        Ok(reranked)
    }
}
