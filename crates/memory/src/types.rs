use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Link types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Semantic relation between two memories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Conflicts,
    InvalidatedBy,
    Supersedes,
    Causes,
    MotivatedBy,
    InstanceOf,
    SharesEntity,
    /// Unknown types survive round-trips but score at the default weight.
    #[serde(untagged)]
    Other(String),
}

impl LinkType {
    /// Priority weight used when reranking linked memories. Contradiction
    /// links outrank everything; entity co-occurrence barely registers.
    pub fn weight(&self) -> f32 {
        match self {
            LinkType::Conflicts => 1.0,
            LinkType::InvalidatedBy => 1.0,
            LinkType::Supersedes => 0.9,
            LinkType::Causes => 0.8,
            LinkType::MotivatedBy => 0.8,
            LinkType::InstanceOf => 0.7,
            LinkType::SharesEntity => 0.4,
            LinkType::Other(_) => 0.5,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LinkType::Conflicts => "conflicts",
            LinkType::InvalidatedBy => "invalidated_by",
            LinkType::Supersedes => "supersedes",
            LinkType::Causes => "causes",
            LinkType::MotivatedBy => "motivated_by",
            LinkType::InstanceOf => "instance_of",
            LinkType::SharesEntity => "shares_entity",
            LinkType::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "conflicts" => LinkType::Conflicts,
            "invalidated_by" => LinkType::InvalidatedBy,
            "supersedes" => LinkType::Supersedes,
            "causes" => LinkType::Causes,
            "motivated_by" => LinkType::MotivatedBy,
            "instance_of" => LinkType::InstanceOf,
            "shares_entity" => LinkType::SharesEntity,
            other => LinkType::Other(other.to_string()),
        }
    }
}

/// One directed edge of the memory graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLink {
    pub target_id: Uuid,
    pub link_type: LinkType,
    pub confidence: f32,
    pub reasoning: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A stored memory. Immutable after commit apart from access bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub user_id: String,
    pub text: String,
    /// 384-dim, L2-normalized.
    pub embedding: Vec<f32>,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: i64,
    pub happens_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub outbound_links: Vec<MemoryLink>,
    pub inbound_links: Vec<MemoryLink>,
}

/// A memory awaiting storage (text + scoring, no embedding yet).
#[derive(Debug, Clone)]
pub struct ExtractedMemory {
    pub text: String,
    pub importance: f32,
    pub happens_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Patch applied by [`crate::store::MemoryStore::update_memory`].
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub text: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub importance: Option<f32>,
    /// Bump `access_count` and stamp `last_accessed`.
    pub touch: bool,
}

/// A memory reached through link traversal, with the edge that led there.
#[derive(Debug, Clone)]
pub struct TraversedLink {
    pub memory: Memory,
    pub link_type: LinkType,
    pub confidence: f32,
    pub reasoning: String,
    pub depth: usize,
    pub linked_from_id: Uuid,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Surfaced results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Edge metadata attached to a linked memory in a surfaced result tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkMetadata {
    pub link_type: LinkType,
    pub confidence: f32,
    pub reasoning: String,
    pub depth: usize,
    pub linked_from_id: Uuid,
}

/// The hierarchical form handed to the orchestrator and trinkets: each
/// primary memory carries its reranked linked memories as children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfacedMemory {
    pub id: Uuid,
    pub text: String,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: i64,
    pub happens_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_metadata: Option<LinkMetadata>,
    #[serde(default)]
    pub linked_memories: Vec<SurfacedMemory>,
}

impl SurfacedMemory {
    pub fn from_memory(m: &Memory) -> Self {
        Self {
            id: m.id,
            text: m.text.clone(),
            importance: m.importance,
            created_at: m.created_at,
            last_accessed: m.last_accessed,
            access_count: m.access_count,
            happens_at: m.happens_at,
            expires_at: m.expires_at,
            link_metadata: None,
            linked_memories: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search intent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How to weight text vs. vector evidence, derived from the touchstone's
/// conversational intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchIntent {
    Recall,
    Explore,
    Exact,
    General,
}

impl SearchIntent {
    /// `(vector_weight, text_weight)` for hybrid scoring.
    pub fn weights(&self) -> (f32, f32) {
        match self {
            SearchIntent::Recall => (0.45, 0.55),
            SearchIntent::Exact => (0.35, 0.65),
            SearchIntent::Explore => (0.75, 0.25),
            SearchIntent::General => (0.60, 0.40),
        }
    }

    /// Keyword match over the touchstone's free-text intent field.
    pub fn from_conversational_intent(intent: &str) -> Self {
        let lower = intent.to_lowercase();
        if lower.contains("recall") || lower.contains("remember") {
            SearchIntent::Recall
        } else if lower.contains("explore") || lower.contains("learn") {
            SearchIntent::Explore
        } else if lower.contains("exact") || lower.contains("specific") {
            SearchIntent::Exact
        } else {
            SearchIntent::General
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_type_weights_match_the_table() {
        assert_eq!(LinkType::Conflicts.weight(), 1.0);
        assert_eq!(LinkType::InvalidatedBy.weight(), 1.0);
        assert_eq!(LinkType::Supersedes.weight(), 0.9);
        assert_eq!(LinkType::Causes.weight(), 0.8);
        assert_eq!(LinkType::MotivatedBy.weight(), 0.8);
        assert_eq!(LinkType::InstanceOf.weight(), 0.7);
        assert_eq!(LinkType::SharesEntity.weight(), 0.4);
        assert_eq!(LinkType::Other("made_up".into()).weight(), 0.5);
    }

    #[test]
    fn link_type_parse_round_trips() {
        for name in [
            "conflicts",
            "invalidated_by",
            "supersedes",
            "causes",
            "motivated_by",
            "instance_of",
            "shares_entity",
        ] {
            assert_eq!(LinkType::parse(name).as_str(), name);
        }
        assert_eq!(LinkType::parse("novel_kind").as_str(), "novel_kind");
    }

    #[test]
    fn intent_derivation_from_keywords() {
        assert_eq!(
            SearchIntent::from_conversational_intent("trying to recall a detail"),
            SearchIntent::Recall
        );
        assert_eq!(
            SearchIntent::from_conversational_intent("wants to learn about Rust"),
            SearchIntent::Explore
        );
        assert_eq!(
            SearchIntent::from_conversational_intent("needs a specific value"),
            SearchIntent::Exact
        );
        assert_eq!(
            SearchIntent::from_conversational_intent("casual chat"),
            SearchIntent::General
        );
    }

    #[test]
    fn explore_intent_favors_vectors() {
        let (vec_w, text_w) = SearchIntent::Explore.weights();
        assert!(vec_w > text_w);
        let (vec_w, text_w) = SearchIntent::Exact.weights();
        assert!(text_w > vec_w);
    }
}
