//! Proactive-memory trinket.
//!
//! Caches the memories the orchestrator surfaced this turn (so the next
//! turn's retention step can evaluate them) and renders them as a
//! hierarchical block for the dynamic prompt suffix.

use parking_lot::RwLock;

use mnemon_domain::error::Result;
use mnemon_memory::SurfacedMemory;

use crate::core::Trinket;

#[derive(Default)]
pub struct ProactiveMemoryTrinket {
    cache: RwLock<Vec<SurfacedMemory>>,
}

impl ProactiveMemoryTrinket {
    pub fn new() -> Self {
        Self::default()
    }

    /// The memories surfaced on the most recent turn. The orchestrator
    /// reads these for retention evaluation before fresh retrieval runs.
    pub fn cached_memories(&self) -> Vec<SurfacedMemory> {
        self.cache.read().clone()
    }

    fn render(memories: &[SurfacedMemory]) -> String {
        if memories.is_empty() {
            return String::new();
        }
        let mut lines = vec!["## Things you remember".to_string()];
        for memory in memories {
            lines.push(format!("- {}", memory.text));
            for linked in &memory.linked_memories {
                let annotation = linked
                    .link_metadata
                    .as_ref()
                    .map(|meta| format!(" [{}]", meta.link_type.as_str()))
                    .unwrap_or_default();
                lines.push(format!("  - {}{annotation}", linked.text));
            }
        }
        lines.join("\n")
    }
}

impl Trinket for ProactiveMemoryTrinket {
    fn name(&self) -> &'static str {
        "ProactiveMemoryTrinket"
    }

    fn variable_name(&self) -> &'static str {
        "surfaced_memories"
    }

    fn cache_policy(&self) -> bool {
        false
    }

    fn generate_content(&self, context: &serde_json::Value) -> Result<String> {
        // An update carrying memories replaces the cache; a plain compose
        // fan-out renders whatever is cached.
        if let Some(memories_value) = context.get("memories") {
            let memories: Vec<SurfacedMemory> =
                serde_json::from_value(memories_value.clone())?;
            *self.cache.write() = memories;
        }
        Ok(Self::render(&self.cache.read()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mnemon_memory::{LinkMetadata, LinkType};
    use uuid::Uuid;

    fn surfaced(text: &str) -> SurfacedMemory {
        SurfacedMemory {
            id: Uuid::new_v4(),
            text: text.into(),
            importance: 0.6,
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            access_count: 0,
            happens_at: None,
            expires_at: None,
            link_metadata: None,
            linked_memories: Vec::new(),
        }
    }

    #[test]
    fn update_with_memories_replaces_cache_and_renders() {
        let trinket = ProactiveMemoryTrinket::new();
        let mut primary = surfaced("Taylor prefers PgBouncer");
        let mut linked = surfaced("Earlier setup used raw connections");
        linked.link_metadata = Some(LinkMetadata {
            link_type: LinkType::Supersedes,
            confidence: 0.9,
            reasoning: String::new(),
            depth: 1,
            linked_from_id: primary.id,
        });
        primary.linked_memories.push(linked);

        let context = serde_json::json!({
            "memories": [primary],
        });
        let content = trinket.generate_content(&context).unwrap();
        assert!(content.contains("- Taylor prefers PgBouncer"));
        assert!(content.contains("  - Earlier setup used raw connections [supersedes]"));
        assert_eq!(trinket.cached_memories().len(), 1);
    }

    #[test]
    fn compose_fanout_renders_existing_cache() {
        let trinket = ProactiveMemoryTrinket::new();
        trinket
            .generate_content(&serde_json::json!({"memories": [surfaced("sticky fact")]}))
            .unwrap();

        let content = trinket
            .generate_content(&serde_json::json!({"user_id": "u1"}))
            .unwrap();
        assert!(content.contains("sticky fact"));
    }

    #[test]
    fn empty_cache_renders_nothing() {
        let trinket = ProactiveMemoryTrinket::new();
        let content = trinket
            .generate_content(&serde_json::json!({"user_id": "u1"}))
            .unwrap();
        assert!(content.is_empty());
    }

    #[test]
    fn update_with_empty_list_clears_cache() {
        let trinket = ProactiveMemoryTrinket::new();
        trinket
            .generate_content(&serde_json::json!({"memories": [surfaced("old")]}))
            .unwrap();
        trinket
            .generate_content(&serde_json::json!({"memories": []}))
            .unwrap();
        assert!(trinket.cached_memories().is_empty());
    }
}
