//! Fingerprint generation: expands a fragmentary user message into a
//! retrieval-optimized query, and evaluates which previously surfaced
//! memories should stay pinned in context.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use std::sync::OnceLock;

use mnemon_continuum::Continuum;
use mnemon_domain::config::AnalysisConfig;
use mnemon_domain::error::{Error, Result};
use mnemon_domain::message::{ChatMessage, Role};
use mnemon_memory::SurfacedMemory;
use mnemon_providers::{GenerateOverrides, LlmProvider};

use crate::prompts;
use crate::tags;

/// User/assistant pairs of context for the expansion call.
const CONTEXT_PAIRS: usize = 6;

fn fingerprint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<fingerprint>(.*?)</fingerprint>").unwrap())
}

fn retention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<memory_retention>(.*?)</memory_retention>").unwrap())
}

fn retained_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[x\]\s*(.+)").unwrap())
}

pub struct FingerprintGenerator {
    provider: Arc<LlmProvider>,
    config: AnalysisConfig,
    api_key: String,
}

impl FingerprintGenerator {
    pub fn new(provider: Arc<LlmProvider>, config: AnalysisConfig) -> Result<Self> {
        if !config.enabled {
            return Err(Error::Config(
                "fingerprint generation requires the analysis path to be enabled".into(),
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
            config,
            api_key,
        })
    }

    /// Returns `(fingerprint, retained_texts)`. Failure is a hard error;
    /// a turn never proceeds on a guessed query.
    pub async fn generate(
        &self,
        continuum: &Continuum,
        current_user_message: &str,
        previous_memories: &[SurfacedMemory],
    ) -> Result<(String, HashSet<String>)> {
        let conversation_turns = format_recent_pairs(continuum, CONTEXT_PAIRS);
        let memories_block = format_previous_memories(previous_memories);

        let user_message = prompts::FINGERPRINT_USER
            .replace("{conversation_turns}", &conversation_turns)
            .replace("{user_message}", current_user_message)
            .replace("{previous_memories}", &memories_block);

        let response = self
            .provider
            .generate_response(
                vec![ChatMessage::user(user_message)],
                GenerateOverrides {
                    endpoint_url: Some(self.config.endpoint.clone()),
                    api_key: Some(self.api_key.clone()),
                    model: Some(self.config.model.clone()),
                    system: Some(prompts::FINGERPRINT_SYSTEM.to_string()),
                    max_tokens: None,
                },
            )
            .await
            .map_err(|e| Error::Logic(format!("fingerprint generation failed: {e}")))?;

        let text = response.text();
        let (fingerprint, retained) = parse_fingerprint_response(&text, previous_memories)?;

        tracing::info!(
            fingerprint = %fingerprint.chars().take(120).collect::<String>(),
            retained = retained.len(),
            evaluated = previous_memories.len(),
            "fingerprint generated"
        );
        Ok((fingerprint, retained))
    }
}

/// Parse the fingerprint and retention decisions.
///
/// - `<fingerprint>` absent: the whole response (minus any retention
///   block) is the fingerprint.
/// - Empty fingerprint: error.
/// - `<memory_retention>` absent while previous memories exist:
///   conservative default, retain everything (logged).
pub fn parse_fingerprint_response(
    response_text: &str,
    previous_memories: &[SurfacedMemory],
) -> Result<(String, HashSet<String>)> {
    let fingerprint = match fingerprint_re().captures(response_text) {
        Some(captures) => captures[1].trim().to_string(),
        None => retention_re()
            .replace_all(response_text, "")
            .trim()
            .to_string(),
    };
    if fingerprint.is_empty() {
        return Err(Error::Logic(
            "failed to extract fingerprint from response".into(),
        ));
    }

    let mut retained: HashSet<String> = HashSet::new();
    if previous_memories.is_empty() {
        return Ok((fingerprint, retained));
    }

    match retention_re().captures(response_text) {
        Some(captures) => {
            for line in retained_line_re().captures_iter(&captures[1]) {
                let text = line[1].trim();
                if !text.is_empty() {
                    retained.insert(text.to_string());
                }
            }
        }
        None => {
            tracing::warn!("no <memory_retention> block in response, retaining all memories");
            retained = previous_memories
                .iter()
                .map(|m| m.text.clone())
                .filter(|t| !t.is_empty())
                .collect();
        }
    }

    Ok((fingerprint, retained))
}

/// Last N user→assistant pairs, skipping collapsed segment summaries,
/// plus nothing else — the current message is appended by the caller's
/// template.
fn format_recent_pairs(continuum: &Continuum, max_pairs: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let messages = &continuum.messages;
    let mut i = messages.len() as isize - 1;
    let mut pairs = 0usize;

    while i >= 0 && pairs < max_pairs {
        while i >= 0 {
            let m = &messages[i as usize];
            if m.role == Role::Assistant && !m.is_collapsed_summary() {
                break;
            }
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

    lines.join("\n")
}

fn format_previous_memories(memories: &[SurfacedMemory]) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let mut lines = vec!["\n<previous_memories>".to_string()];
    for memory in memories {
        if !memory.text.is_empty() {
            lines.push(memory.text.clone());
        }
    }
    lines.push("</previous_memories>\n".to_string());
    lines.join("\n")
}
