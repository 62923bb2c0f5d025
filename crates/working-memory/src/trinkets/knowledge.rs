//! Domain-knowledge trinket: injects the user's single enabled block,
//! wrapped in a tag named after its label. The block content changes
//! rarely (it refreshes on a turn batch), so it belongs in the cached
//! block.

use std::sync::Arc;

use mnemon_domain::error::Result;
use mnemon_memory::KnowledgeStore;

use crate::core::Trinket;

pub struct DomainKnowledgeTrinket {
    store: Arc<KnowledgeStore>,
}

impl DomainKnowledgeTrinket {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

impl Trinket for DomainKnowledgeTrinket {
    fn name(&self) -> &'static str {
        "DomainKnowledgeTrinket"
    }

    fn variable_name(&self) -> &'static str {
        "domain_knowledge"
    }

    fn cache_policy(&self) -> bool {
        true
    }

    fn generate_content(&self, context: &serde_json::Value) -> Result<String> {
        let Some(user_id) = context.get("user_id").and_then(|v| v.as_str()) else {
            return Ok(String::new());
        };
        let Some((block, value)) = self.store.enabled_content(user_id)? else {
            return Ok(String::new());
        };
        Ok(format!(
            "<{label} description=\"{description}\">\n{value}\n</{label}>",
            label = block.label,
            description = block.description,
        ))
    }
}
