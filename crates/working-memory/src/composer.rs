//! Two-block system prompt composition.
//!
//! Sections arrive in registration order with a cache policy each. The
//! cached block (base prompt first, then cacheable sections) is meant for
//! the provider's prompt cache; everything volatile lands in the dynamic
//! suffix block.

struct Section {
    name: String,
    content: String,
    cache_policy: bool,
}

#[derive(Default)]
pub struct Composer {
    base_prompt: String,
    sections: Vec<Section>,
}

/// The composed two-block output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub cached_content: String,
    pub non_cached_content: String,
}

impl Composer {
    pub fn set_base_prompt(&mut self, base_prompt: &str) {
        self.base_prompt = base_prompt.to_string();
    }

    /// Drop all sections, keeping the base prompt.
    pub fn clear_sections(&mut self) {
        self.sections.clear();
    }

    /// Add a section, or replace it in place if the name already exists
    /// (a replacement keeps its original position).
    pub fn add_section(&mut self, name: &str, content: &str, cache_policy: bool) {
        if let Some(existing) = self.sections.iter_mut().find(|s| s.name == name) {
            existing.content = content.to_string();
            existing.cache_policy = cache_policy;
            return;
        }
        self.sections.push(Section {
            name: name.to_string(),
            content: content.to_string(),
            cache_policy,
        });
    }

    pub fn compose(&self) -> ComposedPrompt {
        let mut cached_parts = Vec::new();
        if !self.base_prompt.is_empty() {
            cached_parts.push(self.base_prompt.as_str());
        }
        let mut dynamic_parts = Vec::new();

        for section in &self.sections {
            if section.content.is_empty() {
                continue;
            }
            if section.cache_policy {
                cached_parts.push(section.content.as_str());
            } else {
                dynamic_parts.push(section.content.as_str());
            }
        }

        ComposedPrompt {
            cached_content: cached_parts.join("\n\n"),
            non_cached_content: dynamic_parts.join("\n\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_prompt_leads_the_cached_block() {
        let mut composer = Composer::default();
        composer.set_base_prompt("You are Mnemon.");
        composer.add_section("guidance", "Be concise.", true);
        composer.add_section("reminders", "Dentist at 3pm.", false);

        let prompt = composer.compose();
        assert_eq!(prompt.cached_content, "You are Mnemon.\n\nBe concise.");
        assert_eq!(prompt.non_cached_content, "Dentist at 3pm.");
    }

    #[test]
    fn sections_keep_registration_order() {
        let mut composer = Composer::default();
        composer.set_base_prompt("base");
        composer.add_section("first", "A", false);
        composer.add_section("second", "B", false);
        composer.add_section("third", "C", false);

        assert_eq!(composer.compose().non_cached_content, "A\n\nB\n\nC");
    }

    #[test]
    fn replacement_keeps_position() {
        let mut composer = Composer::default();
        composer.add_section("first", "A", false);
        composer.add_section("second", "B", false);
        composer.add_section("first", "A2", false);

        assert_eq!(composer.compose().non_cached_content, "A2\n\nB");
    }

    #[test]
    fn clear_keeps_base_prompt() {
        let mut composer = Composer::default();
        composer.set_base_prompt("base");
        composer.add_section("x", "gone", true);
        composer.clear_sections();

        let prompt = composer.compose();
        assert_eq!(prompt.cached_content, "base");
        assert!(prompt.non_cached_content.is_empty());
    }

    #[test]
    fn empty_sections_are_skipped() {
        let mut composer = Composer::default();
        composer.set_base_prompt("base");
        composer.add_section("empty", "", false);
        assert!(composer.compose().non_cached_content.is_empty());
    }
}
