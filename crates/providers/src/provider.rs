//! The LLM provider: model tiering, the tool loop with its circuit
//! breaker, failover routing, and the streaming event surface the
//! orchestrator consumes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use mnemon_domain::config::LlmConfig;
use mnemon_domain::error::{Error, Result};
use mnemon_domain::message::{
    AssistantMessage, ChatMessage, ContentBlock, MessageContent, Role, StopReason, SystemBlock,
};
use mnemon_domain::stream::{BoxStream, ProviderEvent, Usage};
use mnemon_domain::tool::{ToolCall, ToolDefinition};

use crate::breaker::BreakerState;
use crate::failover::FailoverState;
use crate::native::{NativeAdapter, StreamItem};
use crate::openai_compat::OpenAiCompatAdapter;
use crate::request::{is_failover_trigger, validate_messages, ProviderRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executes tool calls on behalf of the tool loop. Implementations are
/// pluggable; their side effects are none of the loop's business.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completion backends
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One completion source. The native adapter streams; the emergency
/// adapter completes in one shot and is re-played as a two-item stream.
#[async_trait::async_trait]
pub(crate) trait CompletionBackend: Send + Sync {
    async fn stream(
        &self,
        req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamItem>>>;
}

#[async_trait::async_trait]
impl CompletionBackend for NativeAdapter {
    async fn stream(
        &self,
        req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamItem>>> {
        NativeAdapter::stream(self, req).await
    }
}

struct EmergencyBackend {
    adapter: OpenAiCompatAdapter,
}

#[async_trait::async_trait]
impl CompletionBackend for EmergencyBackend {
    async fn stream(
        &self,
        req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamItem>>> {
        let message = self.adapter.complete(req).await?;
        let mut items: Vec<Result<StreamItem>> = Vec::new();
        let text = message.text();
        if !text.is_empty() {
            items.push(Ok(StreamItem::Text(text)));
        }
        for call in message.tool_calls() {
            items.push(Ok(StreamItem::ToolDetected {
                tool_name: call.tool_name,
            }));
        }
        items.push(Ok(StreamItem::Complete(message)));
        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-call knobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-turn adjustments carried from continuum preferences.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub model_preference: Option<String>,
    pub thinking_enabled: Option<bool>,
    pub thinking_budget: Option<u32>,
}

/// Per-call overrides for [`LlmProvider::generate_response`]; the
/// analysis path uses these to hit its own fast endpoint.
#[derive(Debug, Clone, Default)]
pub struct GenerateOverrides {
    pub endpoint_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LlmProvider {
    config: LlmConfig,
    failover: Arc<FailoverState>,
    primary: Arc<dyn CompletionBackend>,
    emergency: Option<Arc<dyn CompletionBackend>>,
    emergency_model: String,
}

impl LlmProvider {
    /// Build the provider from config. Secrets come from the environment;
    /// a missing primary key is a hard startup error, a missing failover
    /// key just disables failover.
    pub fn from_config(config: LlmConfig, failover: Arc<FailoverState>) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            Error::Config(format!(
                "environment variable '{}' not set",
                config.api_key_env
            ))
        })?;
        let primary: Arc<dyn CompletionBackend> = Arc::new(NativeAdapter::new(
            &config.base_url,
            &api_key,
            config.timeout_secs,
        )?);

        let mut emergency: Option<Arc<dyn CompletionBackend>> = None;
        if config.failover.enabled {
            match std::env::var(&config.failover.api_key_env) {
                Ok(key) => {
                    emergency = Some(Arc::new(EmergencyBackend {
                        adapter: OpenAiCompatAdapter::new(
                            &config.failover.endpoint,
                            &key,
                            config.timeout_secs,
                        )?,
                    }));
                }
                Err(_) => {
                    tracing::warn!(
                        env = %config.failover.api_key_env,
                        "failover enabled but key env unset; failover disabled"
                    );
                }
            }
        }

        let emergency_model = config.failover.model.clone();
        Ok(Self {
            config,
            failover,
            primary,
            emergency,
            emergency_model,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_backends(
        config: LlmConfig,
        failover: Arc<FailoverState>,
        primary: Arc<dyn CompletionBackend>,
        emergency: Option<Arc<dyn CompletionBackend>>,
    ) -> Self {
        let emergency_model = config.failover.model.clone();
        Self {
            config,
            failover,
            primary,
            emergency,
            emergency_model,
        }
    }

    pub fn failover_state(&self) -> Arc<FailoverState> {
        self.failover.clone()
    }

    /// One-step look-behind tier selection: the cheaper execution model
    /// handles the turn right after a response that stopped on tool_use
    /// where every invoked tool is in `simple_tools`.
    pub fn select_model(&self, last_response: Option<&AssistantMessage>) -> String {
        if let Some(last) = last_response {
            if last.stop_reason == StopReason::ToolUse {
                let calls = last.tool_calls();
                if !calls.is_empty()
                    && calls
                        .iter()
                        .all(|c| self.config.simple_tools.contains(&c.tool_name))
                {
                    return self.config.execution_model.clone();
                }
            }
        }
        self.config.reasoning_model.clone()
    }

    /// Thinking is only enabled for the reasoning tier, and per-turn
    /// preferences can force it off or resize the budget.
    fn thinking_for(&self, model: &str, opts: &StreamOptions) -> Option<u32> {
        if model != self.config.reasoning_model {
            return None;
        }
        let enabled = opts.thinking_enabled.unwrap_or(self.config.extended_thinking);
        if !enabled {
            return None;
        }
        Some(
            opts.thinking_budget
                .unwrap_or(self.config.extended_thinking_budget),
        )
    }

    fn build_request(
        &self,
        system: Vec<SystemBlock>,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
        model: String,
        thinking_budget: Option<u32>,
    ) -> ProviderRequest {
        ProviderRequest {
            system,
            messages,
            tools,
            model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            thinking_budget,
            enable_prompt_caching: self.config.enable_prompt_caching,
        }
    }

    // ── Non-streaming entry point ──────────────────────────────────

    /// One completion without tools. With `endpoint_url` set the call
    /// bypasses the primary entirely and goes through the
    /// OpenAI-compatible translator (the analysis path).
    pub async fn generate_response(
        &self,
        messages: Vec<ChatMessage>,
        overrides: GenerateOverrides,
    ) -> Result<AssistantMessage> {
        validate_messages(&messages)?;

        let system = overrides
            .system
            .map(|text| vec![SystemBlock { text, cached: false }])
            .unwrap_or_default();

        if let Some(endpoint) = &overrides.endpoint_url {
            let adapter = OpenAiCompatAdapter::new(
                endpoint,
                overrides.api_key.as_deref().unwrap_or_default(),
                self.config.timeout_secs,
            )?;
            let req = ProviderRequest {
                system,
                messages,
                tools: Vec::new(),
                model: overrides
                    .model
                    .unwrap_or_else(|| self.config.reasoning_model.clone()),
                max_tokens: overrides.max_tokens.unwrap_or(self.config.max_tokens),
                temperature: self.config.temperature,
                thinking_budget: None,
                enable_prompt_caching: false,
            };
            return adapter.complete(&req).await;
        }

        let model = overrides
            .model
            .unwrap_or_else(|| self.select_model(None));
        let req = self.build_request(system, messages, Vec::new(), model, None);
        let mut stream = self.routed_stream(&req).await?;

        let mut response = None;
        while let Some(item) = stream.next().await {
            if let StreamItem::Complete(message) = item? {
                response = Some(message);
            }
        }
        response.ok_or_else(|| Error::Http("stream ended without completion".into()))
    }

    // ── Backend routing with failover ──────────────────────────────

    async fn routed_stream(
        &self,
        req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamItem>>> {
        if self.failover.is_active() {
            if let Some(emergency) = &self.emergency {
                let mut emergency_req = req.clone();
                emergency_req.model = self.emergency_model.clone();
                emergency_req.thinking_budget = None;
                return emergency.stream(&emergency_req).await;
            }
        }

        match self.primary.stream(req).await {
            Ok(stream) => Ok(stream),
            Err(e) if is_failover_trigger(&e) && self.emergency.is_some() => {
                tracing::error!(error = %e, "primary provider failed, activating failover");
                self.failover
                    .activate(Duration::from_secs(self.config.failover.recovery_delay_seconds));
                let emergency = self.emergency.as_ref().unwrap();
                let mut emergency_req = req.clone();
                emergency_req.model = self.emergency_model.clone();
                emergency_req.thinking_budget = None;
                emergency.stream(&emergency_req).await
            }
            Err(e) => Err(e),
        }
    }

    // ── Streaming entry point: the tool loop ───────────────────────

    /// Stream one full turn. When tools and an executor are provided the
    /// loop re-streams after each round of tool results until the model
    /// stops calling tools or the circuit breaker trips. `Complete` is
    /// always the final event and carries the accumulated response.
    pub fn stream_events(
        self: &Arc<Self>,
        system: Vec<SystemBlock>,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
        executor: Option<Arc<dyn ToolExecutor>>,
        opts: StreamOptions,
    ) -> BoxStream<'static, ProviderEvent> {
        let provider = self.clone();

        let stream = async_stream::stream! {
            if let Err(e) = validate_messages(&messages) {
                yield ProviderEvent::Error { message: e.to_string() };
                yield ProviderEvent::Complete {
                    response: empty_response(&provider.config.reasoning_model),
                };
                return;
            }

            let mut breaker = BreakerState::new(provider.config.max_iterations);
            let mut loop_messages = messages;
            let mut accumulated: Vec<ContentBlock> = Vec::new();
            let mut total_usage = Usage::default();
            let mut saw_usage = false;
            let mut last_response: Option<AssistantMessage> = None;
            let mut final_model = provider.config.reasoning_model.clone();

            loop {
                if let Some(reason) = breaker.check() {
                    tracing::warn!(
                        iterations = breaker.iterations(),
                        reason = %reason.message(),
                        "tool loop circuit breaker tripped"
                    );
                    yield ProviderEvent::CircuitBreaker { reason: reason.message() };
                    break;
                }

                let model = opts
                    .model_preference
                    .clone()
                    .unwrap_or_else(|| provider.select_model(last_response.as_ref()));
                let thinking = provider.thinking_for(&model, &opts);
                final_model = model.clone();

                let req = provider.build_request(
                    system.clone(),
                    loop_messages.clone(),
                    tools.clone(),
                    model,
                    thinking,
                );
                breaker.record_iteration();

                let mut inner = match provider.routed_stream(&req).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        yield ProviderEvent::Error { message: e.to_string() };
                        break;
                    }
                };

                let mut response: Option<AssistantMessage> = None;
                let mut stream_failed = false;
                while let Some(item) = inner.next().await {
                    match item {
                        Ok(StreamItem::Text(text)) => {
                            yield ProviderEvent::Text { content: text };
                        }
                        Ok(StreamItem::Thinking(text)) => {
                            yield ProviderEvent::Thinking { content: text };
                        }
                        Ok(StreamItem::ToolDetected { tool_name }) => {
                            yield ProviderEvent::ToolDetected { tool_name };
                        }
                        Ok(StreamItem::Complete(message)) => {
                            response = Some(message);
                        }
                        Err(e) => {
                            yield ProviderEvent::Error { message: e.to_string() };
                            stream_failed = true;
                            break;
                        }
                    }
                }
                if stream_failed {
                    break;
                }
                let Some(response) = response else {
                    yield ProviderEvent::Error {
                        message: "stream ended without completion".into(),
                    };
                    break;
                };

                accumulated.extend(response.content.iter().cloned());
                if let Some(usage) = &response.usage {
                    saw_usage = true;
                    total_usage.input_tokens += usage.input_tokens;
                    total_usage.output_tokens += usage.output_tokens;
                    total_usage.cache_creation_input_tokens += usage.cache_creation_input_tokens;
                    total_usage.cache_read_input_tokens += usage.cache_read_input_tokens;
                }

                let calls = response.tool_calls();
                let can_execute = executor.is_some() && !calls.is_empty();
                if response.stop_reason != StopReason::ToolUse || !can_execute {
                    last_response = Some(response);
                    break;
                }

                // Echo the assistant's blocks into the running transcript,
                // then execute each call and append the results.
                loop_messages.push(ChatMessage {
                    role: Role::Assistant,
                    content: MessageContent::Blocks(response.content.clone()),
                });

                let executor = executor.as_ref().unwrap();
                let mut result_blocks = Vec::with_capacity(calls.len());
                let mut tool_errored = false;
                for call in &calls {
                    yield ProviderEvent::ToolExecuting {
                        tool_name: call.tool_name.clone(),
                        arguments: call.arguments.clone(),
                    };
                    match executor.execute(call).await {
                        Ok(result) => {
                            breaker.record_result(&result);
                            yield ProviderEvent::ToolCompleted {
                                tool_name: call.tool_name.clone(),
                            };
                            result_blocks.push(ContentBlock::ToolResult {
                                tool_use_id: call.call_id.clone(),
                                content: result,
                                is_error: false,
                            });
                        }
                        Err(e) => {
                            breaker.record_error(&e.to_string());
                            tool_errored = true;
                            yield ProviderEvent::ToolError {
                                tool_name: call.tool_name.clone(),
                                message: e.to_string(),
                            };
                            result_blocks.push(ContentBlock::ToolResult {
                                tool_use_id: call.call_id.clone(),
                                content: e.to_string(),
                                is_error: true,
                            });
                        }
                    }
                    if tool_errored {
                        break;
                    }
                }

                loop_messages.push(ChatMessage {
                    role: Role::User,
                    content: MessageContent::Blocks(result_blocks),
                });
                last_response = Some(response);
            }

            let stop_reason = last_response
                .as_ref()
                .map(|r| r.stop_reason)
                .unwrap_or(StopReason::EndTurn);
            yield ProviderEvent::Complete {
                response: AssistantMessage {
                    content: accumulated,
                    stop_reason,
                    model: final_model,
                    usage: saw_usage.then_some(total_usage),
                },
            };
        };

        Box::pin(stream)
    }
}

fn empty_response(model: &str) -> AssistantMessage {
    AssistantMessage {
        content: Vec::new(),
        stop_reason: StopReason::EndTurn,
        model: model.to_string(),
        usage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    fn text_response(text: &str, stop: StopReason) -> AssistantMessage {
        AssistantMessage {
            content: vec![ContentBlock::Text { text: text.into() }],
            stop_reason: stop,
            model: "scripted".into(),
            usage: None,
        }
    }

    fn tool_response(text: &str, tool: &str, call_id: &str) -> AssistantMessage {
        AssistantMessage {
            content: vec![
                ContentBlock::Text { text: text.into() },
                ContentBlock::ToolUse {
                    id: call_id.into(),
                    name: tool.into(),
                    input: serde_json::json!({"value": "x"}),
                },
            ],
            stop_reason: StopReason::ToolUse,
            model: "scripted".into(),
            usage: None,
        }
    }

    /// Backend that replays a queue of responses; repeats the last one if
    /// the loop asks for more.
    struct ScriptedBackend {
        responses: Mutex<VecDeque<AssistantMessage>>,
        requests_seen: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<AssistantMessage>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests_seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn stream(
            &self,
            req: &ProviderRequest,
        ) -> Result<BoxStream<'static, Result<StreamItem>>> {
            self.requests_seen.lock().push(req.clone());
            let message = {
                let mut q = self.responses.lock();
                if q.len() > 1 {
                    q.pop_front().unwrap()
                } else {
                    q.front().cloned().expect("scripted backend exhausted")
                }
            };
            let items: Vec<Result<StreamItem>> = vec![
                Ok(StreamItem::Text(message.text())),
                Ok(StreamItem::Complete(message)),
            ];
            Ok(Box::pin(futures_util::stream::iter(items)))
        }
    }

    /// Backend that always fails with a 503.
    struct FailingBackend;

    #[async_trait::async_trait]
    impl CompletionBackend for FailingBackend {
        async fn stream(
            &self,
            _req: &ProviderRequest,
        ) -> Result<BoxStream<'static, Result<StreamItem>>> {
            Err(Error::Upstream {
                status: 503,
                message: "service unavailable".into(),
            })
        }
    }

    struct EchoExecutor {
        output: String,
    }

    #[async_trait::async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(&self, _call: &ToolCall) -> Result<String> {
            Ok(self.output.clone())
        }
    }

    struct CountingExecutor {
        count: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl ToolExecutor for CountingExecutor {
        async fn execute(&self, _call: &ToolCall) -> Result<String> {
            let mut count = self.count.lock();
            *count += 1;
            Ok(format!("distinct result {}", count))
        }
    }

    struct FailingExecutor;

    #[async_trait::async_trait]
    impl ToolExecutor for FailingExecutor {
        async fn execute(&self, _call: &ToolCall) -> Result<String> {
            Err(Error::Other("tool exploded".into()))
        }
    }

    fn config(max_iterations: u32) -> LlmConfig {
        LlmConfig {
            reasoning_model: "big-model".into(),
            execution_model: "small-model".into(),
            simple_tools: ["get_time".to_string()].into_iter().collect(),
            max_iterations,
            ..Default::default()
        }
    }

    fn provider(
        responses: Vec<AssistantMessage>,
        max_iterations: u32,
    ) -> (Arc<LlmProvider>, Arc<ScriptedBackend>) {
        let backend = ScriptedBackend::new(responses);
        let provider = Arc::new(LlmProvider::with_backends(
            config(max_iterations),
            Arc::new(FailoverState::new()),
            backend.clone(),
            None,
        ));
        (provider, backend)
    }

    fn echo_tool() -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "echoes".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    async fn collect(
        provider: &Arc<LlmProvider>,
        tools: Vec<ToolDefinition>,
        executor: Option<Arc<dyn ToolExecutor>>,
    ) -> Vec<ProviderEvent> {
        provider
            .stream_events(
                vec![SystemBlock { text: "be brief".into(), cached: true }],
                vec![ChatMessage::user("go")],
                tools,
                executor,
                StreamOptions::default(),
            )
            .collect()
            .await
    }

    fn final_response(events: &[ProviderEvent]) -> &AssistantMessage {
        match events.last().unwrap() {
            ProviderEvent::Complete { response } => response,
            other => panic!("last event was {other:?}, not Complete"),
        }
    }

    // ── Model tiering ──────────────────────────────────────────────

    #[test]
    fn first_call_uses_reasoning_model() {
        let (provider, _) = provider(vec![text_response("hi", StopReason::EndTurn)], 5);
        assert_eq!(provider.select_model(None), "big-model");
    }

    #[test]
    fn simple_tool_response_drops_to_execution_tier() {
        let (provider, _) = provider(vec![text_response("hi", StopReason::EndTurn)], 5);
        let last = tool_response("checking", "get_time", "c1");
        assert_eq!(provider.select_model(Some(&last)), "small-model");
    }

    #[test]
    fn complex_tool_response_keeps_reasoning_tier() {
        let (provider, _) = provider(vec![text_response("hi", StopReason::EndTurn)], 5);
        let last = tool_response("checking", "run_query", "c1");
        assert_eq!(provider.select_model(Some(&last)), "big-model");
        // end_turn responses never demote either.
        let last = text_response("done", StopReason::EndTurn);
        assert_eq!(provider.select_model(Some(&last)), "big-model");
    }

    #[test]
    fn thinking_only_for_reasoning_tier() {
        let mut cfg = config(5);
        cfg.extended_thinking = true;
        cfg.extended_thinking_budget = 2048;
        let provider = Arc::new(LlmProvider::with_backends(
            cfg,
            Arc::new(FailoverState::new()),
            ScriptedBackend::new(vec![text_response("x", StopReason::EndTurn)]),
            None,
        ));

        let opts = StreamOptions::default();
        assert_eq!(provider.thinking_for("big-model", &opts), Some(2048));
        assert_eq!(provider.thinking_for("small-model", &opts), None);

        let disabled = StreamOptions {
            thinking_enabled: Some(false),
            ..Default::default()
        };
        assert_eq!(provider.thinking_for("big-model", &disabled), None);

        let resized = StreamOptions {
            thinking_budget: Some(512),
            ..Default::default()
        };
        assert_eq!(provider.thinking_for("big-model", &resized), Some(512));
    }

    // ── Plain completion ───────────────────────────────────────────

    #[tokio::test]
    async fn no_tools_yields_text_then_complete() {
        let (provider, _) = provider(vec![text_response("hello there", StopReason::EndTurn)], 5);
        let events = collect(&provider, vec![], None).await;
        assert!(matches!(&events[0], ProviderEvent::Text { content } if content == "hello there"));
        assert!(matches!(events.last().unwrap(), ProviderEvent::Complete { .. }));
        assert_eq!(final_response(&events).text(), "hello there");
    }

    #[tokio::test]
    async fn empty_messages_yield_error_then_complete() {
        let (provider, _) = provider(vec![text_response("x", StopReason::EndTurn)], 5);
        let events = provider
            .stream_events(vec![], vec![], vec![], None, StreamOptions::default())
            .collect::<Vec<_>>()
            .await;
        assert!(matches!(&events[0], ProviderEvent::Error { .. }));
        assert!(matches!(events.last().unwrap(), ProviderEvent::Complete { .. }));
    }

    // ── Tool loop ──────────────────────────────────────────────────

    #[tokio::test]
    async fn repeated_identical_results_break_on_the_second() {
        let (provider, _) = provider(vec![tool_response("calling echo", "echo", "c1")], 10);
        let executor: Arc<dyn ToolExecutor> = Arc::new(EchoExecutor {
            output: "the same thing".into(),
        });
        let events = collect(&provider, vec![echo_tool()], Some(executor)).await;

        let executing: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ProviderEvent::ToolExecuting { .. }))
            .collect();
        assert_eq!(executing.len(), 2, "breaks after the second identical result");

        let breaker = events
            .iter()
            .find_map(|e| match e {
                ProviderEvent::CircuitBreaker { reason } => Some(reason.clone()),
                _ => None,
            })
            .expect("circuit breaker event");
        assert!(breaker.contains("Repeated"));

        // The accumulated response still carries text and both tool calls.
        let response = final_response(&events);
        assert!(response.text().contains("calling echo"));
        let tools_used: Vec<String> = response
            .tool_calls()
            .into_iter()
            .map(|c| c.tool_name)
            .collect();
        assert_eq!(tools_used, vec!["echo", "echo"]);
    }

    #[tokio::test]
    async fn distinct_results_run_to_max_iterations_then_break() {
        let (provider, _) = provider(vec![tool_response("looping", "echo", "c1")], 3);
        let executor: Arc<dyn ToolExecutor> = Arc::new(CountingExecutor {
            count: Mutex::new(0),
        });
        let events = collect(&provider, vec![echo_tool()], Some(executor)).await;

        let executing = events
            .iter()
            .filter(|e| matches!(e, ProviderEvent::ToolExecuting { .. }))
            .count();
        assert_eq!(executing, 3, "all max_iterations iterations complete");

        let breaker = events
            .iter()
            .find_map(|e| match e {
                ProviderEvent::CircuitBreaker { reason } => Some(reason.clone()),
                _ => None,
            })
            .expect("circuit breaker event");
        assert!(breaker.contains("maximum iterations"));
    }

    #[tokio::test]
    async fn run_finishing_within_max_iterations_never_breaks() {
        // Two tool rounds then a final answer, with max_iterations = 3:
        // the last iteration completes and no breaker fires.
        let (provider, _) = provider(
            vec![
                tool_response("round one", "echo", "c1"),
                tool_response("round two", "echo", "c2"),
                text_response("finished", StopReason::EndTurn),
            ],
            3,
        );
        let executor: Arc<dyn ToolExecutor> = Arc::new(CountingExecutor {
            count: Mutex::new(0),
        });
        let events = collect(&provider, vec![echo_tool()], Some(executor)).await;

        assert!(!events
            .iter()
            .any(|e| matches!(e, ProviderEvent::CircuitBreaker { .. })));
        assert!(final_response(&events).text().contains("finished"));
    }

    #[tokio::test]
    async fn tool_error_emits_tool_error_then_breaks() {
        let (provider, _) = provider(vec![tool_response("trying", "echo", "c1")], 10);
        let executor: Arc<dyn ToolExecutor> = Arc::new(FailingExecutor);
        let events = collect(&provider, vec![echo_tool()], Some(executor)).await;

        assert!(events
            .iter()
            .any(|e| matches!(e, ProviderEvent::ToolError { .. })));
        let breaker = events
            .iter()
            .find_map(|e| match e {
                ProviderEvent::CircuitBreaker { reason } => Some(reason.clone()),
                _ => None,
            })
            .expect("circuit breaker event");
        assert!(breaker.contains("Tool error"));
        assert!(matches!(events.last().unwrap(), ProviderEvent::Complete { .. }));
    }

    #[tokio::test]
    async fn tool_results_feed_back_into_the_transcript() {
        let (provider, backend) = provider(
            vec![
                tool_response("step one", "echo", "c1"),
                text_response("all done", StopReason::EndTurn),
            ],
            10,
        );
        let executor: Arc<dyn ToolExecutor> = Arc::new(EchoExecutor {
            output: "tool says hi".into(),
        });
        let events = collect(&provider, vec![echo_tool()], Some(executor)).await;

        assert!(matches!(events.last().unwrap(), ProviderEvent::Complete { .. }));
        let requests = backend.requests_seen.lock();
        assert_eq!(requests.len(), 2);
        // Second request carries the assistant tool_use turn and the
        // tool_result turn.
        let second = &requests[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[1].role, Role::Assistant);
        let MessageContent::Blocks(blocks) = &second.messages[2].content else {
            panic!("expected block content");
        };
        assert!(matches!(
            &blocks[0],
            ContentBlock::ToolResult { content, .. } if content == "tool says hi"
        ));
    }

    // ── Failover ───────────────────────────────────────────────────

    #[tokio::test]
    async fn upstream_failure_activates_failover_and_routes_to_emergency() {
        let mut cfg = config(5);
        cfg.failover.enabled = true;
        cfg.failover.model = "emergency-model".into();
        cfg.failover.recovery_delay_seconds = 60;

        let emergency = ScriptedBackend::new(vec![text_response(
            "answered by fallback",
            StopReason::EndTurn,
        )]);
        let failover = Arc::new(FailoverState::new());
        let provider = Arc::new(LlmProvider::with_backends(
            cfg,
            failover.clone(),
            Arc::new(FailingBackend),
            Some(emergency.clone()),
        ));

        let events = collect(&provider, vec![], None).await;
        assert!(failover.is_active(), "failover flag set after 5xx");
        assert_eq!(final_response(&events).text(), "answered by fallback");
        // The emergency request was re-pointed at the fallback model.
        assert_eq!(emergency.requests_seen.lock()[0].model, "emergency-model");

        // While active, requests skip the primary entirely.
        let events = collect(&provider, vec![], None).await;
        assert_eq!(final_response(&events).text(), "answered by fallback");
        assert_eq!(emergency.requests_seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn without_emergency_the_error_surfaces() {
        let provider = Arc::new(LlmProvider::with_backends(
            config(5),
            Arc::new(FailoverState::new()),
            Arc::new(FailingBackend),
            None,
        ));
        let events = collect(&provider, vec![], None).await;
        assert!(matches!(&events[0], ProviderEvent::Error { .. }));
        assert!(matches!(events.last().unwrap(), ProviderEvent::Complete { .. }));
    }
}
