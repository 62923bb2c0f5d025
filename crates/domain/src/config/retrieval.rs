use serde::{Deserialize, Serialize};

/// Tuning for proactive memory surfacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum primary memories returned per search.
    #[serde(default = "d_max_memories")]
    pub max_memories: usize,
    /// How many hops of the link graph to follow from each primary.
    #[serde(default = "d_link_depth")]
    pub max_link_traversal_depth: usize,
    /// Memories below this importance never surface.
    #[serde(default = "d_min_importance")]
    pub min_importance_score: f32,
    /// Minimum cosine similarity for vector candidates.
    #[serde(default = "d_similarity")]
    pub similarity_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_memories: d_max_memories(),
            max_link_traversal_depth: d_link_depth(),
            min_importance_score: d_min_importance(),
            similarity_threshold: d_similarity(),
        }
    }
}

fn d_max_memories() -> usize {
    10
}
fn d_link_depth() -> usize {
    1
}
fn d_min_importance() -> f32 {
    0.3
}
fn d_similarity() -> f32 {
    0.35
}
