//! Manifest trinket: explains the conversation's segment structure to
//! the model. Static content, so it lives in the cached block.

use mnemon_domain::error::Result;

use crate::core::Trinket;

const MANIFEST: &str = "\
## Conversation structure

Your history may contain structural markers:
- A collapse marker means older segments were summarized; their full \
content is reachable through memory search, not by scrolling up.
- Collapsed segment summaries are telegraphic recaps of past sessions.
- A session boundary marks where the current session began.

Treat surfaced memories as your own recollections and weave them in \
naturally instead of quoting them as records.";

pub struct ManifestTrinket;

impl Trinket for ManifestTrinket {
    fn name(&self) -> &'static str {
        "ManifestTrinket"
    }

    fn variable_name(&self) -> &'static str {
        "conversation_manifest"
    }

    fn cache_policy(&self) -> bool {
        true
    }

    fn generate_content(&self, _context: &serde_json::Value) -> Result<String> {
        Ok(MANIFEST.to_string())
    }
}
