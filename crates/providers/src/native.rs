//! Native messages-API adapter.
//!
//! Speaks the Anthropic-style protocol directly: structured `system`
//! blocks with `cache_control`, tool_use/tool_result content blocks,
//! extended thinking, and SSE streaming.

use std::collections::BTreeMap;

use serde_json::Value;

use mnemon_domain::error::{Error, Result};
use mnemon_domain::message::{
    AssistantMessage, ChatMessage, ContentBlock, MessageContent, Role, StopReason,
};
use mnemon_domain::stream::{BoxStream, Usage};
use mnemon_domain::tool::ToolDefinition;

use crate::request::{map_error_status, ProviderRequest};
use crate::sse::{drain_data_lines, from_reqwest};

const API_VERSION: &str = "2023-06-01";

/// Low-level items from one streamed completion. `Complete` is always
/// last and carries the assembled message.
#[derive(Debug, Clone)]
pub(crate) enum StreamItem {
    Text(String),
    Thinking(String),
    ToolDetected { tool_name: String },
    Complete(AssistantMessage),
}

pub struct NativeAdapter {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl NativeAdapter {
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

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
    }

    pub async fn complete(&self, req: &ProviderRequest) -> Result<AssistantMessage> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = build_messages_body(req, false);

        tracing::debug!(model = %req.model, "native completion request");
        let resp = self
            .authed_post(&url)
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
        parse_response(&json)
    }

    pub(crate) async fn stream(
        &self,
        req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamItem>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = build_messages_body(req, true);
        let model = req.model.clone();

        tracing::debug!(model = %model, "native streaming request");
        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(map_error_status(status.as_u16(), &text));
        }

        let mut state = StreamState::new(model);
        let stream = async_stream::stream! {
            let mut response = resp;
            let mut buffer = String::new();

            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for data in drain_data_lines(&mut buffer) {
                            for item in state.parse_sse(&data) {
                                yield item;
                            }
                        }
                    }
                    Ok(None) => {
                        if !buffer.trim().is_empty() {
                            buffer.push_str("\n\n");
                            for data in drain_data_lines(&mut buffer) {
                                for item in state.parse_sse(&data) {
                                    yield item;
                                }
                            }
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(from_reqwest(e));
                        break;
                    }
                }
            }

            if !state.complete_emitted {
                yield Ok(StreamItem::Complete(state.assemble(StopReason::EndTurn)));
            }
        };

        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn build_messages_body(req: &ProviderRequest, stream: bool) -> Value {
    let mut body = serde_json::json!({
        "model": req.model,
        "messages": req.messages.iter().map(message_to_wire).collect::<Vec<_>>(),
        "max_tokens": req.max_tokens,
        "stream": stream,
    });

    if !req.system.is_empty() {
        let blocks: Vec<Value> = req
            .system
            .iter()
            .map(|block| {
                let mut v = serde_json::json!({
                    "type": "text",
                    "text": block.text,
                });
                if block.cached && req.enable_prompt_caching {
                    v["cache_control"] = serde_json::json!({"type": "ephemeral"});
                }
                v
            })
            .collect();
        body["system"] = Value::Array(blocks);
    }

    if !req.tools.is_empty() {
        let mut tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
        // Cache breakpoint on the last tool covers the whole tool array.
        if req.enable_prompt_caching {
            if let Some(last) = tools.last_mut() {
                last["cache_control"] = serde_json::json!({"type": "ephemeral"});
            }
        }
        body["tools"] = Value::Array(tools);
    }

    match req.thinking_budget {
        Some(budget) => {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget,
            });
            // Extended thinking requires temperature 1.0.
            body["temperature"] = serde_json::json!(1.0);
        }
        None => {
            body["temperature"] = serde_json::json!(req.temperature);
        }
    }

    body
}

fn message_to_wire(message: &ChatMessage) -> Value {
    let role = match message.role {
        Role::Assistant => "assistant",
        // Tool results travel as user messages on this protocol.
        _ => "user",
    };
    let content = match &message.content {
        MessageContent::Text(t) => Value::String(t.clone()),
        MessageContent::Blocks(blocks) => {
            Value::Array(blocks.iter().map(block_to_wire).collect())
        }
    };
    serde_json::json!({ "role": role, "content": content })
}

fn block_to_wire(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentBlock::Image { media_type, data } => serde_json::json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }),
        ContentBlock::ToolUse { id, name, input } => serde_json::json!({
            "type": "tool_use", "id": id, "name": name, "input": input,
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
        ContentBlock::Thinking { thinking } => serde_json::json!({
            "type": "thinking", "thinking": thinking,
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn parse_stop_reason(s: &str) -> StopReason {
    match s {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        input_tokens: v.get("input_tokens")?.as_u64()? as u32,
        output_tokens: v.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        cache_creation_input_tokens: v
            .get("cache_creation_input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        cache_read_input_tokens: v
            .get("cache_read_input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    })
}

fn parse_response(body: &Value) -> Result<AssistantMessage> {
    let content = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Http("response has no content array".into()))?;

    let mut blocks = Vec::new();
    for block in content {
        let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
        match block_type {
            "text" => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    blocks.push(ContentBlock::Text { text: text.into() });
                }
            }
            "thinking" => {
                if let Some(thinking) = block.get("thinking").and_then(Value::as_str) {
                    blocks.push(ContentBlock::Thinking {
                        thinking: thinking.into(),
                    });
                }
            }
            "tool_use" => {
                blocks.push(ContentBlock::ToolUse {
                    id: block.get("id").and_then(Value::as_str).unwrap_or("").into(),
                    name: block.get("name").and_then(Value::as_str).unwrap_or("").into(),
                    input: block.get("input").cloned().unwrap_or(Value::Object(Default::default())),
                });
            }
            _ => {}
        }
    }

    Ok(AssistantMessage {
        content: blocks,
        stop_reason: body
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(parse_stop_reason)
            .unwrap_or(StopReason::EndTurn),
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .into(),
        usage: body.get("usage").and_then(parse_usage),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum PartialBlock {
    Text(String),
    Thinking(String),
    ToolUse {
        id: String,
        name: String,
        json_buf: String,
    },
}

struct StreamState {
    model: String,
    blocks: BTreeMap<u64, PartialBlock>,
    usage: Option<Usage>,
    stop_reason: Option<StopReason>,
    complete_emitted: bool,
}

impl StreamState {
    fn new(model: String) -> Self {
        Self {
            model,
            blocks: BTreeMap::new(),
            usage: None,
            stop_reason: None,
            complete_emitted: false,
        }
    }

    fn parse_sse(&mut self, data: &str) -> Vec<Result<StreamItem>> {
        let mut items = Vec::new();
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        match v.get("type").and_then(Value::as_str).unwrap_or("") {
            "message_start" => {
                if let Some(message) = v.get("message") {
                    self.usage = message.get("usage").and_then(parse_usage);
                    if let Some(model) = message.get("model").and_then(Value::as_str) {
                        self.model = model.to_string();
                    }
                }
            }

            "content_block_start" => {
                let index = v.get("index").and_then(Value::as_u64).unwrap_or(0);
                if let Some(block) = v.get("content_block") {
                    match block.get("type").and_then(Value::as_str).unwrap_or("") {
                        "text" => {
                            self.blocks.insert(index, PartialBlock::Text(String::new()));
                        }
                        "thinking" => {
                            self.blocks
                                .insert(index, PartialBlock::Thinking(String::new()));
                        }
                        "tool_use" => {
                            let name = block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or("")
                                .to_string();
                            items.push(Ok(StreamItem::ToolDetected {
                                tool_name: name.clone(),
                            }));
                            self.blocks.insert(
                                index,
                                PartialBlock::ToolUse {
                                    id: block
                                        .get("id")
                                        .and_then(Value::as_str)
                                        .unwrap_or("")
                                        .to_string(),
                                    name,
                                    json_buf: String::new(),
                                },
                            );
                        }
                        _ => {}
                    }
                }
            }

            "content_block_delta" => {
                let index = v.get("index").and_then(Value::as_u64).unwrap_or(0);
                if let Some(delta) = v.get("delta") {
                    match delta.get("type").and_then(Value::as_str).unwrap_or("") {
                        "text_delta" => {
                            if let Some(text) = delta.get("text").and_then(Value::as_str) {
                                if let Some(PartialBlock::Text(buf)) = self.blocks.get_mut(&index)
                                {
                                    buf.push_str(text);
                                }
                                if !text.is_empty() {
                                    items.push(Ok(StreamItem::Text(text.to_string())));
                                }
                            }
                        }
                        "thinking_delta" => {
                            if let Some(thinking) =
                                delta.get("thinking").and_then(Value::as_str)
                            {
                                if let Some(PartialBlock::Thinking(buf)) =
                                    self.blocks.get_mut(&index)
                                {
                                    buf.push_str(thinking);
                                }
                                if !thinking.is_empty() {
                                    items.push(Ok(StreamItem::Thinking(thinking.to_string())));
                                }
                            }
                        }
                        "input_json_delta" => {
                            if let Some(partial) =
                                delta.get("partial_json").and_then(Value::as_str)
                            {
                                if let Some(PartialBlock::ToolUse { json_buf, .. }) =
                                    self.blocks.get_mut(&index)
                                {
                                    json_buf.push_str(partial);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }

            "message_delta" => {
                if let Some(usage_val) = v.get("usage") {
                    if let Some(output) = usage_val.get("output_tokens").and_then(Value::as_u64) {
                        if let Some(usage) = &mut self.usage {
                            usage.output_tokens = output as u32;
                        }
                    }
                }
                if let Some(stop) = v
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(Value::as_str)
                {
                    self.stop_reason = Some(parse_stop_reason(stop));
                }
            }

            "message_stop" => {
                let stop_reason = self.stop_reason.unwrap_or(StopReason::EndTurn);
                self.complete_emitted = true;
                items.push(Ok(StreamItem::Complete(self.assemble(stop_reason))));
            }

            "error" => {
                let message = v
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown streaming error");
                items.push(Err(Error::Upstream {
                    status: 200,
                    message: message.to_string(),
                }));
            }

            _ => {
                // ping, content_block_stop, unknown — nothing to emit.
            }
        }

        items
    }

    fn assemble(&mut self, stop_reason: StopReason) -> AssistantMessage {
        let blocks = std::mem::take(&mut self.blocks);
        let content = blocks
            .into_values()
            .filter_map(|partial| match partial {
                PartialBlock::Text(text) => {
                    if text.is_empty() {
                        None
                    } else {
                        Some(ContentBlock::Text { text })
                    }
                }
                PartialBlock::Thinking(thinking) => {
                    if thinking.is_empty() {
                        None
                    } else {
                        Some(ContentBlock::Thinking { thinking })
                    }
                }
                PartialBlock::ToolUse { id, name, json_buf } => {
                    let input = if json_buf.trim().is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&json_buf).unwrap_or_else(|e| {
                            tracing::warn!(tool = %name, error = %e, "tool input was not valid JSON");
                            Value::Object(Default::default())
                        })
                    };
                    Some(ContentBlock::ToolUse { id, name, input })
                }
            })
            .collect();

        AssistantMessage {
            content,
            stop_reason,
            model: self.model.clone(),
            usage: self.usage.clone(),
        }
    }
}
