//! Session cache loader.
//!
//! When a continuum goes cold (cache expiry, new session), the message
//! cache is rebuilt as:
//!
//! 1. collapse marker — older searchable content above
//! 2. recent collapsed segment summaries
//! 3. the last three turns before the active sentinel, for continuity
//! 4. session boundary marker — the new session starts here
//! 5. the active (uncollapsed) segment

use chrono::Utc;
use uuid::Uuid;

use mnemon_domain::error::Result;
use mnemon_domain::message::MessageContent;

use crate::continuum::{MessageMetadata, SegmentStatus, StoredMessage};
use crate::repository::ContinuumRepository;

const CONTINUITY_TURNS: usize = 3;

const COLLAPSE_MARKER_TEXT: &str =
    "[Older conversation segments above this point are collapsed; their content \
     remains reachable through memory search.]";

const SESSION_BOUNDARY_TEXT: &str = "[New session starts here.]";

/// Synthetic sentinel signaling collapsed content above this point.
pub fn make_collapse_marker() -> StoredMessage {
    sentinel(COLLAPSE_MARKER_TEXT, SegmentStatus::Collapsed)
}

/// Synthetic sentinel marking the start of the new session's segment.
pub fn make_session_boundary_marker() -> StoredMessage {
    sentinel(SESSION_BOUNDARY_TEXT, SegmentStatus::Active)
}

fn sentinel(text: &str, status: SegmentStatus) -> StoredMessage {
    let mut message = StoredMessage::new(
        mnemon_domain::message::Role::Assistant,
        MessageContent::Text(text.into()),
    );
    message.metadata = MessageMetadata {
        segment_boundary: true,
        status: Some(status),
        ..Default::default()
    };
    message
}

pub struct SessionCacheLoader<'a> {
    repository: &'a ContinuumRepository,
    summary_count: usize,
}

impl<'a> SessionCacheLoader<'a> {
    pub fn new(repository: &'a ContinuumRepository, summary_count: usize) -> Self {
        Self {
            repository,
            summary_count,
        }
    }

    /// Assemble the cold-start message list for a continuum.
    pub fn load_session_cache(&self, continuum_id: Uuid) -> Result<Vec<StoredMessage>> {
        let summaries = self
            .repository
            .find_collapsed_segments(continuum_id, self.summary_count)?;

        // Without an active sentinel the whole history is the active
        // segment and continuity pairs would only duplicate it.
        let (continuity, active) = match self.repository.find_active_segment(continuum_id)? {
            Some(sentinel) => (
                self.repository
                    .load_continuity_messages(continuum_id, CONTINUITY_TURNS)?,
                self.repository
                    .load_segment_messages(continuum_id, sentinel.created_at)?,
            ),
            None => (
                Vec::new(),
                self.repository
                    .load_segment_messages(continuum_id, chrono::DateTime::<Utc>::MIN_UTC)?,
            ),
        };

        let mut messages =
            Vec::with_capacity(summaries.len() + continuity.len() + active.len() + 2);
        messages.push(make_collapse_marker());
        messages.extend(summaries);
        messages.extend(continuity);
        messages.push(make_session_boundary_marker());
        messages.extend(active);

        tracing::info!(
            continuum_id = %continuum_id,
            total = messages.len(),
            "session cache loaded"
        );
        Ok(messages)
    }
}
