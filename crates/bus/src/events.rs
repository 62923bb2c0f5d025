//! The shared event contract.
//!
//! Trinket update context rides as loose JSON so the bus stays independent
//! of the memory crate's types; the proactive-memory trinket deserializes
//! its own payload.

use serde::Serialize;
use uuid::Uuid;

/// An event published on the bus. `seq` is unique and monotonically
/// increasing per process.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub seq: u64,
    pub continuum_id: Uuid,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize)]
pub enum EventPayload {
    /// Request to assemble the system prompt for the current turn.
    ComposeSystemPrompt {
        base_prompt: String,
        user_id: String,
    },

    /// Routed to one trinket; the context shape is trinket-specific.
    UpdateTrinket {
        target_trinket: String,
        context: serde_json::Value,
    },

    /// A trinket's rendered section.
    TrinketContent {
        variable_name: String,
        content: String,
        cache_policy: bool,
        trinket_name: String,
    },

    /// The composer's two-block output.
    SystemPromptComposed {
        cached_content: String,
        non_cached_content: String,
    },

    /// A full user→assistant turn finished (before commit).
    TurnCompleted { user_id: String, turn_number: u32 },

    /// The continuum cache crossed the segment threshold and minted a
    /// boundary sentinel.
    SegmentBoundaryCreated { message_id: Uuid },
}

impl EventPayload {
    /// Dispatch key for subscriptions.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::ComposeSystemPrompt { .. } => "ComposeSystemPrompt",
            EventPayload::UpdateTrinket { .. } => "UpdateTrinket",
            EventPayload::TrinketContent { .. } => "TrinketContent",
            EventPayload::SystemPromptComposed { .. } => "SystemPromptComposed",
            EventPayload::TurnCompleted { .. } => "TurnCompleted",
            EventPayload::SegmentBoundaryCreated { .. } => "SegmentBoundaryCreated",
        }
    }
}
