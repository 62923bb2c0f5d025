//! The turn orchestrator: drives one user message to one assistant
//! reply.
//!
//! Sequence per turn: append the user message to the continuum cache,
//! generate the touchstone, expand the message into a retrieval
//! fingerprint while evaluating retention of previously surfaced
//! memories, run fresh retrieval, merge pinned + fresh, hand the set to
//! the proactive-memory trinket, compose the system prompt over the bus,
//! stream the model against the tool registry, parse tags, append the
//! assistant reply, and stage everything on the unit of work. The caller
//! owns commit and rollback.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use mnemon_analysis::{tags, FingerprintGenerator, TouchstoneGenerator};
use mnemon_bus::{EventBus, EventPayload};
use mnemon_continuum::{Continuum, MessageMetadata, UnitOfWork};
use mnemon_domain::error::{Error, Result};
use mnemon_domain::message::{MessageContent, SystemBlock};
use mnemon_domain::stream::ProviderEvent;
use mnemon_embeddings::EmbeddingsClient;
use mnemon_memory::{RetrievalEngine, RetrievalLogEntry, SurfacedMemory};
use mnemon_providers::{LlmProvider, StreamOptions, ToolExecutor};
use mnemon_working_memory::ProactiveMemoryTrinket;

use crate::api::protocol::ServerFrame;
use crate::runtime::tools::{RegistryExecutor, ToolRegistry};

/// Fresh-retrieval width per turn.
const FRESH_RETRIEVAL_LIMIT: usize = 20;

const CONTINUATION_PROMPT: &str = "Great, the tool is now available. Please proceed with \
     completing the original task using the newly loaded tool.";

/// What a completed turn hands back to the session.
#[derive(Debug, Clone, Default)]
pub struct TurnMetadata {
    pub tools_used: Vec<String>,
    pub referenced_memories: Vec<String>,
    pub surfaced_memories: Vec<Uuid>,
    pub emotion: Option<String>,
}

pub struct Orchestrator {
    bus: Arc<EventBus>,
    provider: Arc<LlmProvider>,
    embeddings: Arc<EmbeddingsClient>,
    retrieval: Arc<RetrievalEngine>,
    touchstone_gen: Arc<TouchstoneGenerator>,
    fingerprint_gen: Arc<FingerprintGenerator>,
    proactive: Arc<ProactiveMemoryTrinket>,
    registry: Arc<ToolRegistry>,
    tool_loader_name: String,
    /// Captured `SystemPromptComposed` output, keyed by continuum id so
    /// concurrent turns for different users cannot cross.
    composed: Arc<Mutex<HashMap<Uuid, (String, String)>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<EventBus>,
        provider: Arc<LlmProvider>,
        embeddings: Arc<EmbeddingsClient>,
        retrieval: Arc<RetrievalEngine>,
        touchstone_gen: Arc<TouchstoneGenerator>,
        fingerprint_gen: Arc<FingerprintGenerator>,
        proactive: Arc<ProactiveMemoryTrinket>,
        registry: Arc<ToolRegistry>,
        tool_loader_name: String,
    ) -> Arc<Self> {
        let composed: Arc<Mutex<HashMap<Uuid, (String, String)>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let capture = composed.clone();
        bus.subscribe("SystemPromptComposed", move |event| {
            if let EventPayload::SystemPromptComposed {
                cached_content,
                non_cached_content,
            } = &event.payload
            {
                capture.lock().insert(
                    event.continuum_id,
                    (cached_content.clone(), non_cached_content.clone()),
                );
            }
            Ok(())
        });

        Arc::new(Self {
            bus,
            provider,
            embeddings,
            retrieval,
            touchstone_gen,
            fingerprint_gen,
            proactive,
            registry,
            tool_loader_name,
            composed,
        })
    }

    /// Process one user message. When the model loads a tool through the
    /// loader, a single synthetic continuation turn runs on the same unit
    /// of work; the guard is sticky, so a second load inside the
    /// continuation does not recurse again.
    pub async fn process_message(
        &self,
        continuum: &mut Continuum,
        user_content: MessageContent,
        system_prompt: &str,
        events_tx: Option<&mpsc::UnboundedSender<ServerFrame>>,
        uow: &mut UnitOfWork,
    ) -> Result<(String, TurnMetadata)> {
        let (response, metadata, invoked_loader) = self
            .run_turn(continuum, user_content, system_prompt, events_tx, uow)
            .await?;

        if !invoked_loader {
            return Ok((response, metadata));
        }

        tracing::info!(continuum_id = %continuum.id, "auto-continuing after tool load");
        let (response, metadata, _) = self
            .run_turn(
                continuum,
                MessageContent::Text(CONTINUATION_PROMPT.into()),
                system_prompt,
                events_tx,
                uow,
            )
            .await?;
        Ok((response, metadata))
    }

    async fn run_turn(
        &self,
        continuum: &mut Continuum,
        user_content: MessageContent,
        system_prompt: &str,
        events_tx: Option<&mpsc::UnboundedSender<ServerFrame>>,
        uow: &mut UnitOfWork,
    ) -> Result<(String, TurnMetadata, bool)> {
        let user_id = continuum.user_id.clone();
        let continuum_id = continuum.id;

        // 1. Append the user message to the cache (no persistence yet).
        let (user_msg, user_events) = continuum.add_user_message(user_content);
        for payload in user_events {
            self.bus.publish(continuum_id, payload);
        }

        // 2. Text for context embeddings; multimodal content reduces to
        //    its text blocks.
        let mut text_for_context = user_msg.content.extract_all_text();
        if text_for_context.trim().is_empty() {
            text_for_context = "Image uploaded".to_string();
        }

        // 3. Previously surfaced memories, for retention evaluation.
        let previous_memories = self.proactive.cached_memories();

        // 4. Touchstone first so retrieval sees this turn's focus.
        let touchstone = self
            .touchstone_gen
            .generate(continuum, &text_for_context)
            .await?;

        // 5. Fingerprint expansion + retention decisions.
        let (fingerprint, retained_texts) = self
            .fingerprint_gen
            .generate(continuum, &text_for_context, &previous_memories)
            .await?;

        // 6. Pin what the model kept.
        let pinned = apply_retention(previous_memories, &retained_texts);

        // 7. Query encoding.
        let fingerprint_embedding = self.embeddings.encode_fast(&fingerprint).await?;

        // 8. Fresh retrieval.
        let fresh = self
            .retrieval
            .search_with_embedding(
                &user_id,
                &fingerprint_embedding,
                &touchstone,
                &fingerprint,
                Some(FRESH_RETRIEVAL_LIMIT),
            )
            .await?;

        // 9. Merge, pinned first.
        let surfaced = merge_memories(pinned, fresh);
        let surfaced_ids: Vec<Uuid> = surfaced.iter().map(|m| m.id).collect();
        tracing::info!(
            continuum_id = %continuum_id,
            surfaced = surfaced.len(),
            "memory surfacing complete"
        );

        // 10. Stage the retrieval log for commit.
        uow.stage_retrieval_log(RetrievalLogEntry::new(
            continuum_id,
            text_for_context.clone(),
            fingerprint.clone(),
            surfaced_ids.clone(),
        ));

        // 11. Hand the set to the proactive-memory trinket (it caches for
        //     next turn's retention and renders during composition).
        self.bus.publish(
            continuum_id,
            EventPayload::UpdateTrinket {
                target_trinket: "ProactiveMemoryTrinket".into(),
                context: serde_json::json!({ "memories": surfaced }),
            },
        );

        // 12. Compose the system prompt; the bus is synchronous so the
        //     captured output is ready when publish returns.
        self.composed.lock().remove(&continuum_id);
        self.bus.publish(
            continuum_id,
            EventPayload::ComposeSystemPrompt {
                base_prompt: system_prompt.to_string(),
                user_id: user_id.clone(),
            },
        );
        let (cached_content, non_cached_content) = self
            .composed
            .lock()
            .remove(&continuum_id)
            .unwrap_or_default();

        let mut system = Vec::new();
        if !cached_content.is_empty() {
            system.push(SystemBlock { text: cached_content, cached: true });
        }
        if !non_cached_content.is_empty() {
            system.push(SystemBlock { text: non_cached_content, cached: false });
        }

        // 13. Continuum preferences pass through to the provider.
        let opts = StreamOptions {
            model_preference: continuum.metadata.model_preference.clone(),
            thinking_enabled: continuum
                .metadata
                .thinking_budget_preference
                .map(|budget| budget > 0),
            thinking_budget: continuum
                .metadata
                .thinking_budget_preference
                .filter(|budget| *budget > 0),
        };

        // 14. Stream the model against the tool registry.
        let executor: Arc<dyn ToolExecutor> =
            Arc::new(RegistryExecutor::new(self.registry.clone(), &user_id));
        let mut stream = self.provider.stream_events(
            system,
            continuum.messages_for_api(),
            self.registry.definitions(),
            Some(executor),
            opts,
        );

        let mut invoked_tool_loader = false;
        let mut raw_response = None;
        let mut stream_error: Option<String> = None;

        while let Some(event) = stream.next().await {
            if let ProviderEvent::ToolExecuting { tool_name, arguments } = &event {
                if tool_name == &self.tool_loader_name && loader_mode_triggers(arguments) {
                    invoked_tool_loader = true;
                    tracing::info!(tool = %tool_name, "tool loader invoked");
                }
            }

            match &event {
                ProviderEvent::Complete { response } => raw_response = Some(response.clone()),
                ProviderEvent::Error { message } => stream_error = Some(message.clone()),
                _ => {}
            }

            if let (Some(tx), Some(frame)) = (events_tx, to_wire_frame(&event)) {
                let _ = tx.send(frame);
            }
        }

        if let Some(message) = stream_error {
            return Err(Error::Other(message));
        }
        let raw_response =
            raw_response.ok_or_else(|| Error::Other("model produced no completion".into()))?;

        // 15. Parse tags, preserving the emotion tag for the client.
        let parsed = tags::parse_response(&raw_response.text(), &["my_emotion"]);

        // 16. A blank reply means an upstream problem; surface it before
        //     anything is persisted.
        if parsed.clean_text.trim().is_empty() {
            return Err(Error::Other(
                "assistant response was empty; likely an upstream API error".into(),
            ));
        }

        // 17. Append the assistant message with its turn metadata.
        let tools_used: Vec<String> = raw_response
            .tool_calls()
            .into_iter()
            .map(|c| c.tool_name)
            .collect();
        let assistant_metadata = MessageMetadata {
            referenced_memories: parsed.referenced_memories.clone(),
            surfaced_memories: surfaced_ids.clone(),
            emotion: parsed.emotion.clone(),
            ..Default::default()
        };
        let (assistant_msg, response_events) =
            continuum.add_assistant_message(parsed.clean_text.clone(), assistant_metadata);
        for payload in response_events {
            self.bus.publish(continuum_id, payload);
        }

        // 18. Let subscribers react (knowledge refresh batching, tool
        //     auto-unload). Their failures never abort the commit.
        self.bus.publish(
            continuum_id,
            EventPayload::TurnCompleted {
                user_id: user_id.clone(),
                turn_number: continuum.turn_number(),
            },
        );

        // 19. Stage the pair; multimodal user content persists text-only.
        let persist_user = if user_msg.content.is_multimodal() {
            let mut text_only = user_msg.clone();
            text_only.content = MessageContent::Text(text_for_context.clone());
            text_only
        } else {
            user_msg
        };
        uow.add_messages(persist_user, assistant_msg);
        uow.mark_metadata_updated();

        let metadata = TurnMetadata {
            tools_used,
            referenced_memories: parsed.referenced_memories,
            surfaced_memories: surfaced_ids,
            emotion: parsed.emotion,
        };
        Ok((parsed.clean_text, metadata, invoked_tool_loader))
    }
}

/// Keep only memories whose text the model marked `[x]`, by verbatim
/// match. Memories with empty text never survive.
pub(crate) fn apply_retention(
    previous: Vec<SurfacedMemory>,
    retained_texts: &HashSet<String>,
) -> Vec<SurfacedMemory> {
    if previous.is_empty() || retained_texts.is_empty() {
        return Vec::new();
    }
    previous
        .into_iter()
        .filter(|m| !m.text.is_empty() && retained_texts.contains(&m.text))
        .collect()
}

/// Pinned first, then fresh, deduplicated by memory id.
pub(crate) fn merge_memories(
    pinned: Vec<SurfacedMemory>,
    fresh: Vec<SurfacedMemory>,
) -> Vec<SurfacedMemory> {
    let mut seen: HashSet<Uuid> = pinned.iter().map(|m| m.id).collect();
    let mut merged = pinned;
    for memory in fresh {
        if seen.insert(memory.id) {
            merged.push(memory);
        }
    }
    merged
}

/// The loader only counts as "loaded something" in `load`/`fallback`
/// mode; listing modes don't trigger continuation.
fn loader_mode_triggers(arguments: &Value) -> bool {
    matches!(
        arguments.get("mode").and_then(Value::as_str),
        Some("load") | Some("fallback")
    )
}

fn to_wire_frame(event: &ProviderEvent) -> Option<ServerFrame> {
    match event {
        ProviderEvent::Text { content } => Some(ServerFrame::Text {
            content: content.clone(),
        }),
        ProviderEvent::Thinking { content } => Some(ServerFrame::Thinking {
            content: content.clone(),
        }),
        ProviderEvent::ToolDetected { tool_name } => Some(ServerFrame::Tool {
            event: "detected",
            name: tool_name.clone(),
        }),
        ProviderEvent::ToolExecuting { tool_name, .. } => Some(ServerFrame::Tool {
            event: "executing",
            name: tool_name.clone(),
        }),
        ProviderEvent::ToolCompleted { tool_name } => Some(ServerFrame::Tool {
            event: "completed",
            name: tool_name.clone(),
        }),
        ProviderEvent::ToolError { tool_name, .. } => Some(ServerFrame::Tool {
            event: "error",
            name: tool_name.clone(),
        }),
        // Circuit breaks, stream errors, and completion are handled by
        // the turn itself, not forwarded as raw frames.
        _ => None,
    }
}
