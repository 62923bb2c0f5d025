mod continuum;
mod embeddings;
mod knowledge;
mod llm;
mod retrieval;
mod server;

pub use continuum::*;
pub use embeddings::*;
pub use knowledge::*;
pub use llm::*;
pub use retrieval::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub continuum: ContinuumConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

impl Config {
    /// Load config from a toml file. A missing file yields defaults so a
    /// fresh checkout boots without setup.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_parses_with_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.retrieval.max_memories, 10);
        assert_eq!(config.llm.max_iterations, 10);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [retrieval]
            max_memories = 25

            [llm]
            reasoning_model = "claude-sonnet-4-20250514"
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.max_memories, 25);
        assert!((config.retrieval.min_importance_score - 0.3).abs() < 1e-9);
        assert_eq!(config.llm.reasoning_model, "claude-sonnet-4-20250514");
        assert_eq!(config.llm.max_iterations, 10);
    }
}
