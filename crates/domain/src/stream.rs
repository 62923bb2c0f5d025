use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::message::AssistantMessage;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while a turn is being generated.
///
/// The orchestrator forwards these to the streaming session; `Complete` is
/// always the final event of a well-formed stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ProviderEvent {
    /// A text token chunk.
    #[serde(rename = "text")]
    Text { content: String },

    /// An extended-thinking chunk.
    #[serde(rename = "thinking")]
    Thinking { content: String },

    /// The model emitted a tool_use block (not yet executed).
    #[serde(rename = "tool_detected")]
    ToolDetected { tool_name: String },

    /// A tool is being executed.
    #[serde(rename = "tool_executing")]
    ToolExecuting {
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// A tool finished executing.
    #[serde(rename = "tool_completed")]
    ToolCompleted { tool_name: String },

    /// A tool raised during execution.
    #[serde(rename = "tool_error")]
    ToolError { tool_name: String, message: String },

    /// The tool loop was halted by a safety condition.
    #[serde(rename = "circuit_breaker")]
    CircuitBreaker { reason: String },

    /// An error occurred during generation.
    #[serde(rename = "error")]
    Error { message: String },

    /// Generation finished; carries the assembled response.
    #[serde(rename = "complete")]
    Complete { response: AssistantMessage },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
    #[serde(default)]
    pub cache_read_input_tokens: u32,
}
