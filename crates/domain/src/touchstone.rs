use serde::{Deserialize, Serialize};

/// A structured semantic summary of a continuum's current focus,
/// regenerated every turn by the analysis path and stored on the continuum
/// alongside a 384-dim embedding.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Touchstone {
    pub narrative: String,
    #[serde(default)]
    pub temporal_context: String,
    pub relationship_context: String,
    pub entities: Vec<String>,
    #[serde(default)]
    pub conversational_intent: String,
    #[serde(default)]
    pub semantic_hooks: Vec<String>,
}

impl Touchstone {
    /// The text that gets embedded: narrative + relationship context +
    /// entities, space-joined.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {}",
            self.narrative,
            self.relationship_context,
            self.entities.join(" ")
        )
    }
}
