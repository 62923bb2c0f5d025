use serde::{Deserialize, Serialize};

/// A message in a conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(crate::error::Error::Validation(format!(
                "unknown role: {other}"
            ))),
        }
    }
}

/// Message content: either a plain string or an ordered block sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// The single sum type for a content block. Every surface (continuum cache,
/// provider wire, trinket render) speaks this type; accessors produce string
/// views without mutating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        media_type: String,
        /// Base64-encoded payload.
        data: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
            }]),
        }
    }
}

impl MessageContent {
    /// Extract and join all text content, returning an owned String.
    ///
    /// For `Text`, returns the string directly. For `Blocks`, joins all
    /// `Text` blocks with a single space; non-text blocks are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Whether the content contains anything besides plain text.
    pub fn is_multimodal(&self) -> bool {
        match self {
            MessageContent::Text(_) => false,
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .any(|b| !matches!(b, ContentBlock::Text { .. })),
        }
    }

    /// Whether the textual portion is empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        match self {
            MessageContent::Text(t) => t.trim().is_empty(),
            MessageContent::Blocks(blocks) => {
                blocks.is_empty()
                    || blocks.iter().all(|b| match b {
                        ContentBlock::Text { text } => text.trim().is_empty(),
                        _ => false,
                    })
            }
        }
    }
}

/// The reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// A full assistant response assembled from a completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub model: String,
    pub usage: Option<crate::stream::Usage>,
}

impl AssistantMessage {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool_use blocks as calls.
    pub fn tool_calls(&self) -> Vec<crate::tool::ToolCall> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(crate::tool::ToolCall {
                    call_id: id.clone(),
                    tool_name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// One block of structured system content. Cached blocks carry
/// `cache_control: ephemeral` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,
    pub cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_skips_non_text_blocks() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Text { text: "part one".into() },
            ContentBlock::Image {
                media_type: "image/png".into(),
                data: "QUJD".into(),
            },
            ContentBlock::Text { text: "part two".into() },
        ]);
        assert_eq!(content.extract_all_text(), "part one part two");
    }

    #[test]
    fn blank_detection() {
        assert!(MessageContent::Text("   \n".into()).is_blank());
        assert!(MessageContent::Blocks(vec![]).is_blank());
        assert!(!MessageContent::Text("hi".into()).is_blank());
        // A tool_use block counts as content even with no text.
        assert!(!MessageContent::Blocks(vec![ContentBlock::ToolUse {
            id: "c1".into(),
            name: "echo".into(),
            input: serde_json::json!({}),
        }])
        .is_blank());
    }

    #[test]
    fn multimodal_detection() {
        assert!(!MessageContent::Text("plain".into()).is_multimodal());
        assert!(MessageContent::Blocks(vec![
            ContentBlock::Text { text: "see this".into() },
            ContentBlock::Image {
                media_type: "image/jpeg".into(),
                data: "QUJD".into(),
            },
        ])
        .is_multimodal());
    }

    #[test]
    fn assistant_message_accessors() {
        let msg = AssistantMessage {
            content: vec![
                ContentBlock::Thinking { thinking: "hmm".into() },
                ContentBlock::Text { text: "I'll check.".into() },
                ContentBlock::ToolUse {
                    id: "call_1".into(),
                    name: "lookup".into(),
                    input: serde_json::json!({"q": "x"}),
                },
            ],
            stop_reason: StopReason::ToolUse,
            model: "test".into(),
            usage: None,
        };
        assert_eq!(msg.text(), "I'll check.");
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "lookup");
    }

    #[test]
    fn content_block_serde_tags() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "c1".into(),
            content: "ok".into(),
            is_error: false,
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["tool_use_id"], "c1");
    }
}
