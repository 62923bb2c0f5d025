//! Fixed-tag parser for model output.
//!
//! The assistant decorates responses with a small set of known tags
//! (`<mira:my_emotion>`, `<mira:referenced_memories>`). This parser
//! extracts them and strips them from the clean text; unknown tags pass
//! through untouched. Callers can ask for specific tags to be preserved
//! in the clean text (the emotion tag is kept for the client to render).

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    pub clean_text: String,
    pub emotion: Option<String>,
    pub referenced_memories: Vec<String>,
}

fn emotion_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<mira:my_emotion>(.*?)</mira:my_emotion>").unwrap())
}

fn referenced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<mira:referenced_memories>(.*?)</mira:referenced_memories>").unwrap()
    })
}

/// Parse a response, extracting known tags. Tags named in `preserve_tags`
/// (by their short name, e.g. `"my_emotion"`) are extracted but left in
/// the clean text.
pub fn parse_response(text: &str, preserve_tags: &[&str]) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();

    if let Some(captures) = emotion_re().captures(text) {
        parsed.emotion = Some(captures[1].trim().to_string());
    }
    if let Some(captures) = referenced_re().captures(text) {
        parsed.referenced_memories = captures[1]
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }

    let mut clean = text.to_string();
    if !preserve_tags.contains(&"my_emotion") {
        clean = emotion_re().replace_all(&clean, "").to_string();
    }
    if !preserve_tags.contains(&"referenced_memories") {
        clean = referenced_re().replace_all(&clean, "").to_string();
    }
    parsed.clean_text = clean.trim().to_string();
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_strips_emotion() {
        let parsed = parse_response(
            "Glad that worked! <mira:my_emotion>pleased</mira:my_emotion>",
            &[],
        );
        assert_eq!(parsed.emotion.as_deref(), Some("pleased"));
        assert_eq!(parsed.clean_text, "Glad that worked!");
    }

    #[test]
    fn preserve_keeps_tag_in_clean_text() {
        let parsed = parse_response(
            "Done. <mira:my_emotion>satisfied</mira:my_emotion>",
            &["my_emotion"],
        );
        assert_eq!(parsed.emotion.as_deref(), Some("satisfied"));
        assert!(parsed.clean_text.contains("<mira:my_emotion>satisfied</mira:my_emotion>"));
    }

    #[test]
    fn referenced_memories_split_on_commas() {
        let parsed = parse_response(
            "As you mentioned. <mira:referenced_memories>m1, m7,m9</mira:referenced_memories>",
            &[],
        );
        assert_eq!(parsed.referenced_memories, vec!["m1", "m7", "m9"]);
        assert_eq!(parsed.clean_text, "As you mentioned.");
    }

    #[test]
    fn unknown_tags_pass_through() {
        let parsed = parse_response("See <sup>note</sup> and <custom:thing>x</custom:thing>.", &[]);
        assert_eq!(
            parsed.clean_text,
            "See <sup>note</sup> and <custom:thing>x</custom:thing>."
        );
        assert!(parsed.emotion.is_none());
    }

    #[test]
    fn no_tags_leaves_text_untouched() {
        let parsed = parse_response("Plain answer.", &[]);
        assert_eq!(parsed.clean_text, "Plain answer.");
        assert!(parsed.referenced_memories.is_empty());
    }
}
