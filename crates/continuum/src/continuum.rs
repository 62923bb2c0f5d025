//! The per-user conversation object: an in-memory ordered message cache
//! plus metadata (touchstone, preferences). Owned by exactly one turn at a
//! time; persisted through the unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mnemon_bus::EventPayload;
use mnemon_domain::message::{ChatMessage, MessageContent, Role};
use mnemon_domain::touchstone::Touchstone;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stored messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Active,
    Collapsed,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentStatus::Active => "active",
            SegmentStatus::Collapsed => "collapsed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub segment_boundary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SegmentStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_memories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub surfaced_memories: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

/// A message as held in the continuum cache and persisted to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl StoredMessage {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            created_at: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    /// Whether this is a collapsed segment summary sentinel.
    pub fn is_collapsed_summary(&self) -> bool {
        self.metadata.segment_boundary && self.metadata.status == Some(SegmentStatus::Collapsed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Continuum
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContinuumMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_touchstone: Option<Touchstone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touchstone_embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_preference: Option<String>,
    /// `None` = provider default, `Some(0)` = thinking disabled,
    /// `Some(n)` = thinking enabled with an n-token budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget_preference: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_days: Vec<String>,
}

/// Snapshot for mid-turn rollback: message count plus metadata copy.
#[derive(Debug, Clone)]
pub struct ContinuumSnapshot {
    message_len: usize,
    metadata: ContinuumMetadata,
}

#[derive(Debug, Clone)]
pub struct Continuum {
    pub id: Uuid,
    pub user_id: String,
    pub messages: Vec<StoredMessage>,
    pub metadata: ContinuumMetadata,
    pub created_at: DateTime<Utc>,
    /// Active-segment size that mints a boundary sentinel.
    segment_size_threshold: usize,
}

impl Continuum {
    pub fn new(
        id: Uuid,
        user_id: impl Into<String>,
        metadata: ContinuumMetadata,
        created_at: DateTime<Utc>,
        segment_size_threshold: usize,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            messages: Vec::new(),
            metadata,
            created_at,
            segment_size_threshold,
        }
    }

    /// Append a user message to the cache (no persistence). Returns the
    /// message and any cache-level events (segment boundary creation).
    pub fn add_user_message(&mut self, content: MessageContent) -> (StoredMessage, Vec<EventPayload>) {
        let message = StoredMessage::new(Role::User, content);
        self.messages.push(message.clone());
        let events = self.maybe_mint_boundary();
        (message, events)
    }

    /// Append the assistant reply with its turn metadata.
    pub fn add_assistant_message(
        &mut self,
        text: impl Into<String>,
        metadata: MessageMetadata,
    ) -> (StoredMessage, Vec<EventPayload>) {
        let mut message = StoredMessage::new(Role::Assistant, MessageContent::Text(text.into()));
        message.metadata = metadata;
        self.messages.push(message.clone());
        let events = self.maybe_mint_boundary();
        (message, events)
    }

    /// Messages in the serialized form the provider expects. Sentinels ride
    /// along as plain text so the model sees segment structure.
    pub fn messages_for_api(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    /// Completed turns (one user + one assistant message each).
    pub fn turn_number(&self) -> u32 {
        ((self.messages.len() + 1) / 2) as u32
    }

    pub fn set_last_touchstone(&mut self, touchstone: Touchstone, embedding: Vec<f32>) {
        self.metadata.last_touchstone = Some(touchstone);
        self.metadata.touchstone_embedding = Some(embedding);
    }

    /// Capture pre-turn state. Pair with [`Continuum::restore`] when the
    /// unit of work is discarded.
    pub fn snapshot(&self) -> ContinuumSnapshot {
        ContinuumSnapshot {
            message_len: self.messages.len(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: ContinuumSnapshot) {
        self.messages.truncate(snapshot.message_len);
        self.metadata = snapshot.metadata;
    }

    /// Replace the cache wholesale (cold-start load).
    pub fn replace_messages(&mut self, messages: Vec<StoredMessage>) {
        self.messages = messages;
    }

    fn active_segment_len(&self) -> usize {
        self.messages
            .iter()
            .rev()
            .take_while(|m| !m.metadata.segment_boundary)
            .count()
    }

    fn maybe_mint_boundary(&mut self) -> Vec<EventPayload> {
        if self.segment_size_threshold == 0
            || self.active_segment_len() < self.segment_size_threshold
        {
            return Vec::new();
        }
        let sentinel = crate::loader::make_session_boundary_marker();
        let id = sentinel.id;
        self.messages.push(sentinel);
        tracing::debug!(continuum_id = %self.id, "segment boundary minted");
        vec![EventPayload::SegmentBoundaryCreated { message_id: id }]
    }
}
