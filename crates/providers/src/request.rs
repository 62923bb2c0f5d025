//! Provider-agnostic request type and outbound validation.

use mnemon_domain::error::{Error, Result};
use mnemon_domain::message::{ChatMessage, SystemBlock};
use mnemon_domain::tool::ToolDefinition;

/// Everything an adapter needs to issue one completion call.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub system: Vec<SystemBlock>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// `Some(budget)` enables extended thinking (reasoning tier only).
    pub thinking_budget: Option<u32>,
    pub enable_prompt_caching: bool,
}

/// Validate messages before send: the list must be non-empty and no
/// message may carry blank string content. Assistant messages whose
/// content is a block list with non-text blocks (tool calls mid-loop)
/// pass even without text.
pub fn validate_messages(messages: &[ChatMessage]) -> Result<()> {
    if messages.is_empty() {
        return Err(Error::Validation("message list is empty".into()));
    }
    for (i, message) in messages.iter().enumerate() {
        if message.content.is_blank() {
            return Err(Error::Validation(format!(
                "message {i} ({}) has empty content",
                message.role.as_str()
            )));
        }
    }
    Ok(())
}

/// Map an upstream HTTP status + body to the domain error taxonomy.
pub(crate) fn map_error_status(status: u16, body: &str) -> Error {
    let lower = body.to_lowercase();
    match status {
        400 if lower.contains("context_length") || lower.contains("reduce the length") => {
            Error::ContextLength(body.to_string())
        }
        401 | 403 => Error::Auth(format!("HTTP {status}: {body}")),
        429 => Error::RateLimited(body.to_string()),
        s if s >= 500 => Error::Upstream {
            status: s,
            message: body.to_string(),
        },
        s => Error::Http(format!("HTTP {s}: {body}")),
    }
}

/// Whether an error should trigger provider failover (5xx or transport).
pub(crate) fn is_failover_trigger(error: &Error) -> bool {
    match error {
        Error::Upstream { status, .. } => *status >= 500,
        Error::Http(msg) => msg.contains("connection failed"),
        Error::Timeout(_) => false,
        _ => false,
    }
}
