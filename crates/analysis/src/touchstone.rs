//! Touchstone generation: a pre-turn fast-model call that evolves the
//! continuum's semantic summary so retrieval sees the current turn's
//! focus instead of last turn's.

use std::sync::Arc;

use serde_json::Value;

use mnemon_continuum::Continuum;
use mnemon_domain::config::AnalysisConfig;
use mnemon_domain::error::{Error, Result};
use mnemon_domain::message::{ChatMessage, Role};
use mnemon_domain::touchstone::Touchstone;
use mnemon_embeddings::EmbeddingsClient;
use mnemon_providers::{GenerateOverrides, LlmProvider};

use crate::prompts;
use crate::tags;

pub struct TouchstoneGenerator {
    provider: Arc<LlmProvider>,
    embeddings: Arc<EmbeddingsClient>,
    config: AnalysisConfig,
    api_key: String,
}

impl TouchstoneGenerator {
    pub fn new(
        provider: Arc<LlmProvider>,
        embeddings: Arc<EmbeddingsClient>,
        config: AnalysisConfig,
    ) -> Result<Self> {
        if !config.enabled {
            return Err(Error::Config(
                "touchstone generation requires the analysis path to be enabled".into(),
            ));
        }
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            Error::Config(format!(
                "environment variable '{}' not set",
                config.api_key_env
            ))
        })?;
        Ok(Self {
            provider,
            embeddings,
            config,
            api_key,
        })
    }

    /// Generate the evolved touchstone, embed it, and store both on the
    /// continuum. Any failure is a hard error; there is no degraded state.
    pub async fn generate(
        &self,
        continuum: &mut Continuum,
        current_user_message: &str,
    ) -> Result<Touchstone> {
        let previous_narrative = continuum
            .metadata
            .last_touchstone
            .as_ref()
            .map(|t| t.narrative.clone())
            .unwrap_or_else(|| "None - this is the first exchange".to_string());

        let conversation_turns =
            format_recent_pairs(continuum, current_user_message, self.config.context_pairs);

        let user_message = prompts::TOUCHSTONE_USER
            .replace("{previous_narrative}", &previous_narrative)
            .replace("{conversation_turns}", &conversation_turns);

        let response = self
            .provider
            .generate_response(
                vec![ChatMessage::user(user_message)],
                GenerateOverrides {
                    endpoint_url: Some(self.config.endpoint.clone()),
                    api_key: Some(self.api_key.clone()),
                    model: Some(self.config.model.clone()),
                    system: Some(prompts::TOUCHSTONE_SYSTEM.to_string()),
                    max_tokens: None,
                },
            )
            .await
            .map_err(|e| Error::Logic(format!("touchstone generation failed: {e}")))?;

        let text = response.text();
        let touchstone = parse_touchstone_text(&text)?;

        let embedding = self
            .embeddings
            .encode_fast(&touchstone.embedding_text())
            .await?;

        tracing::info!(
            narrative = %truncate(&touchstone.narrative, 80),
            entities = touchstone.entities.len(),
            "touchstone generated"
        );

        continuum.set_last_touchstone(touchstone.clone(), embedding);
        Ok(touchstone)
    }
}

/// Walk backwards collecting up to `max_pairs` complete user→assistant
/// pairs (tool and system messages skipped), then append the current
/// message. Assistant text is tag-stripped.
fn format_recent_pairs(
    continuum: &Continuum,
    current_user_message: &str,
    max_pairs: usize,
) -> String {
    let mut lines: Vec<String> = Vec::new();
    let messages = &continuum.messages;
    let mut i = messages.len() as isize - 1;
    let mut pairs = 0usize;

    while i >= 0 && pairs < max_pairs {
        while i >= 0 && messages[i as usize].role != Role::Assistant {
            i -= 1;
        }
        if i < 0 {
            break;
        }
        let assistant = &messages[i as usize];
        i -= 1;

        while i >= 0 && messages[i as usize].role != Role::User {
            i -= 1;
        }
        if i < 0 {
            break;
        }
        let user = &messages[i as usize];
        i -= 1;

        let assistant_text =
            tags::parse_response(&assistant.content.extract_all_text(), &[]).clean_text;
        lines.insert(0, format!("Assistant: {assistant_text}"));
        lines.insert(0, format!("User: {}", user.content.extract_all_text()));
        pairs += 1;
    }

    lines.push(format!("User: {current_user_message}"));
    lines.join("\n")
}

/// Parse the model's touchstone JSON: strip markdown fences, parse, and
/// on failure attempt one repair pass before giving up. The required
/// fields are narrative, relationship_context, and entities.
pub fn parse_touchstone_text(raw: &str) -> Result<Touchstone> {
    let text = strip_code_fences(raw.trim());
    if text.is_empty() {
        return Err(Error::Logic("touchstone response was empty".into()));
    }

    let value: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(first_err) => {
            let repaired = repair_json(&text);
            serde_json::from_str(&repaired).map_err(|_| {
                Error::Logic(format!("malformed touchstone JSON: {first_err}"))
            })?
        }
    };

    for field in ["narrative", "relationship_context", "entities"] {
        if value.get(field).is_none() {
            return Err(Error::Logic(format!(
                "touchstone missing required field '{field}'"
            )));
        }
    }

    Ok(Touchstone {
        narrative: string_field(&value, "narrative"),
        temporal_context: string_field(&value, "temporal_context"),
        relationship_context: string_field(&value, "relationship_context"),
        entities: string_list_field(&value, "entities"),
        conversational_intent: string_field(&value, "conversational_intent"),
        semantic_hooks: string_list_field(&value, "semantic_hooks"),
    })
}

fn string_field(value: &Value, field: &str) -> String {
    match value.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) if !other.is_null() => other.to_string(),
        _ => String::new(),
    }
}

/// Accept either a JSON array of strings or a comma-separated string.
fn string_list_field(value: &Value, field: &str) -> Vec<String> {
    match value.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn strip_code_fences(text: &str) -> String {
    if !text.starts_with("```") {
        return text.to_string();
    }
    match (text.find('\n'), text.rfind("```")) {
        (Some(first_newline), Some(last_fence)) if last_fence > first_newline => {
            text[first_newline + 1..last_fence].trim().to_string()
        }
        _ => text.replace("```json", "").replace("```", "").trim().to_string(),
    }
}

/// One-shot repair for the common fast-model JSON mistakes: prose around
/// the object and trailing commas.
fn repair_json(text: &str) -> String {
    let start = text.find('{');
    let end = text.rfind('}');
    let core = match (start, end) {
        (Some(s), Some(e)) if e > s => &text[s..=e],
        _ => text,
    };
    let mut repaired = String::with_capacity(core.len());
    let mut chars = core.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;
    while let Some(c) = chars.next() {
        if in_string {
            repaired.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                repaired.push(c);
            }
            ',' => {
                // Drop a comma directly before a closing bracket.
                let mut lookahead = chars.clone();
                let next_non_ws = lookahead.find(|ch| !ch.is_whitespace());
                if matches!(next_non_ws, Some('}') | Some(']')) {
                    continue;
                }
                repaired.push(c);
            }
            _ => repaired.push(c),
        }
    }
    repaired
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
