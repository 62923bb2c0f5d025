//! OpenAI-compatible translator.
//!
//! The emergency/failover path and the fast analysis endpoints speak the
//! chat-completions protocol. This adapter presents the same surface as
//! the native one but translates both directions:
//!
//! - system block list → one concatenated system string (cache_control
//!   dropped)
//! - assistant tool_use blocks → `tool_calls` entries; thinking blocks
//!   dropped
//! - user tool_result block → `role:"tool"` message with `tool_call_id`
//! - tools → `{type:"function", function:{…}}`
//! - `finish_reason`: stop→end_turn, tool_calls→tool_use,
//!   length→max_tokens

use serde_json::Value;

use mnemon_domain::error::{Error, Result};
use mnemon_domain::message::{
    AssistantMessage, ChatMessage, ContentBlock, MessageContent, Role, StopReason, SystemBlock,
};
use mnemon_domain::stream::Usage;
use mnemon_domain::tool::ToolDefinition;

use crate::request::{map_error_status, ProviderRequest};
use crate::sse::from_reqwest;

pub struct OpenAiCompatAdapter {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    pub async fn complete(&self, req: &ProviderRequest) -> Result<AssistantMessage> {
        let url = if self.base_url.ends_with("/chat/completions") {
            self.base_url.clone()
        } else {
            format!("{}/v1/chat/completions", self.base_url)
        };
        let body = build_chat_body(req);

        tracing::debug!(model = %req.model, url = %url, "openai-compat completion request");
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(map_error_status(status.as_u16(), &text));
        }

        let json: Value = serde_json::from_str(&text)?;
        parse_chat_response(&json, &req.model)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn build_chat_body(req: &ProviderRequest) -> Value {
    let mut wire_messages: Vec<Value> = Vec::new();

    if !req.system.is_empty() {
        wire_messages.push(serde_json::json!({
            "role": "system",
            "content": system_to_openai(&req.system),
        }));
    }
    for message in &req.messages {
        wire_messages.extend(message_to_openai(message));
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": wire_messages,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
    });

    if !req.tools.is_empty() {
        let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

/// Concatenate system text blocks; cache_control has no equivalent here.
pub(crate) fn system_to_openai(system: &[SystemBlock]) -> String {
    system
        .iter()
        .map(|b| b.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Translate one message. A user message holding several tool_result
/// blocks fans out into several `role:"tool"` messages.
pub(crate) fn message_to_openai(message: &ChatMessage) -> Vec<Value> {
    match message.role {
        Role::Assistant => vec![assistant_to_openai(message)],
        _ => match &message.content {
            MessageContent::Text(t) => vec![serde_json::json!({
                "role": "user",
                "content": t,
            })],
            MessageContent::Blocks(blocks) => {
                let tool_results: Vec<Value> = blocks
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => Some(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content,
                        })),
                        _ => None,
                    })
                    .collect();
                if !tool_results.is_empty() {
                    return tool_results;
                }

                let text: Vec<&str> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                vec![serde_json::json!({
                    "role": "user",
                    "content": text.join("\n"),
                })]
            }
        },
    }
}

fn assistant_to_openai(message: &ChatMessage) -> Value {
    let mut out = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &message.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text.clone()),
                    ContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    // Thinking blocks have no chat-completions equivalent.
                    ContentBlock::Thinking { .. } => {}
                    _ => {}
                }
            }
        }
    }

    out["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        out["tool_calls"] = Value::Array(tool_calls);
    }
    out
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn parse_chat_response(body: &Value, requested_model: &str) -> Result<AssistantMessage> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| Error::Http("chat response has no choices".into()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| Error::Http("chat choice has no message".into()))?;

    let mut blocks = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text: text.into() });
        }
    }
    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in tool_calls {
            let function = call.get("function").cloned().unwrap_or_default();
            let arguments = function
                .get("arguments")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or(Value::Object(Default::default()));
            blocks.push(ContentBlock::ToolUse {
                id: call.get("id").and_then(Value::as_str).unwrap_or("").into(),
                name: function
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .into(),
                input: arguments,
            });
        }
    }

    let stop_reason = match choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .unwrap_or("stop")
    {
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    };

    let usage = body.get("usage").map(|u| Usage {
        input_tokens: u
            .get("prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        output_tokens: u
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        cache_creation_input_tokens: 0,
        cache_read_input_tokens: 0,
    });

    Ok(AssistantMessage {
        content: blocks,
        stop_reason,
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .into(),
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request(messages: Vec<ChatMessage>) -> ProviderRequest {
        ProviderRequest {
            system: vec![
                SystemBlock { text: "cached part".into(), cached: true },
                SystemBlock { text: "dynamic part".into(), cached: false },
            ],
            messages,
            tools: vec![ToolDefinition {
                name: "lookup".into(),
                description: "looks things up".into(),
                input_schema: serde_json::json!({"type": "object", "properties": {}}),
            }],
            model: "fallback-model".into(),
            max_tokens: 512,
            temperature: 0.5,
            thinking_budget: None,
            enable_prompt_caching: true,
        }
    }

    #[test]
    fn system_blocks_concatenate_without_cache_control() {
        let body = build_chat_body(&base_request(vec![ChatMessage::user("hi")]));
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "cached part\n\ndynamic part");
    }

    #[test]
    fn tools_use_function_wrapper() {
        let body = build_chat_body(&base_request(vec![ChatMessage::user("hi")]));
        let tool = &body["tools"][0];
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["function"]["name"], "lookup");
        assert!(tool["function"]["parameters"].is_object());
        assert!(tool.get("cache_control").is_none());
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls_and_thinking_drops() {
        let assistant = ChatMessage {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Thinking { thinking: "pondering".into() },
                ContentBlock::Text { text: "checking now".into() },
                ContentBlock::ToolUse {
                    id: "call_3".into(),
                    name: "lookup".into(),
                    input: serde_json::json!({"q": "pool size"}),
                },
            ]),
        };
        let wire = message_to_openai(&assistant);
        assert_eq!(wire.len(), 1);
        let msg = &wire[0];
        assert_eq!(msg["content"], "checking now");
        assert!(msg["content"].as_str().unwrap().find("pondering").is_none());
        assert_eq!(msg["tool_calls"][0]["id"], "call_3");
        assert_eq!(msg["tool_calls"][0]["type"], "function");
        assert_eq!(msg["tool_calls"][0]["function"]["name"], "lookup");
        // Arguments are a JSON-encoded string.
        let args: Value =
            serde_json::from_str(msg["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
                .unwrap();
        assert_eq!(args["q"], "pool size");
    }

    #[test]
    fn tool_result_becomes_tool_role_message() {
        let wire = message_to_openai(&ChatMessage::tool_result("call_3", "pool size is 20"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "call_3");
        assert_eq!(wire[0]["content"], "pool size is 20");
    }

    #[test]
    fn finish_reasons_map_to_stop_reasons() {
        for (finish, expected) in [
            ("stop", StopReason::EndTurn),
            ("tool_calls", StopReason::ToolUse),
            ("length", StopReason::MaxTokens),
        ] {
            let body = serde_json::json!({
                "model": "m",
                "choices": [{"message": {"content": "x"}, "finish_reason": finish}],
            });
            let parsed = parse_chat_response(&body, "m").unwrap();
            assert_eq!(parsed.stop_reason, expected);
        }
    }

    /// Round trip: native-shaped messages → chat-completions wire →
    /// assistant message. Text, tool names, call ids, and tool results
    /// survive; thinking blocks legitimately do not.
    #[test]
    fn translation_round_trip_preserves_tool_identity() {
        let assistant = ChatMessage {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Thinking { thinking: "internal".into() },
                ContentBlock::Text { text: "let me look".into() },
                ContentBlock::ToolUse {
                    id: "call_42".into(),
                    name: "search".into(),
                    input: serde_json::json!({"limit": 3}),
                },
            ]),
        };
        let tool_result = ChatMessage::tool_result("call_42", "three results");

        let assistant_wire = message_to_openai(&assistant).remove(0);
        let result_wire = message_to_openai(&tool_result).remove(0);

        // Wrap the assistant wire form as a chat response and parse back.
        let response = serde_json::json!({
            "model": "m",
            "choices": [{
                "message": assistant_wire,
                "finish_reason": "tool_calls",
            }],
        });
        let recovered = parse_chat_response(&response, "m").unwrap();

        assert_eq!(recovered.text(), "let me look");
        let calls = recovered.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_id, "call_42");
        assert_eq!(calls[0].tool_name, "search");
        assert_eq!(calls[0].arguments, serde_json::json!({"limit": 3}));
        // Thinking was dropped in translation.
        assert!(recovered
            .content
            .iter()
            .all(|b| !matches!(b, ContentBlock::Thinking { .. })));

        // Tool result kept its id and content on the wire.
        assert_eq!(result_wire["tool_call_id"], "call_42");
        assert_eq!(result_wire["content"], "three results");
    }

    #[test]
    fn usage_parses_from_openai_fields() {
        let body = serde_json::json!({
            "model": "m",
            "choices": [{"message": {"content": "x"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 11, "completion_tokens": 7},
        });
        let parsed = parse_chat_response(&body, "m").unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.input_tokens, 11);
        assert_eq!(usage.output_tokens, 7);
    }
}
