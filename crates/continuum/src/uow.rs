//! The turn-scoped unit of work.
//!
//! Accumulates the turn's writes (user + assistant message pair, a
//! metadata-dirty flag, the retrieval-log entry) and commits them in one
//! transaction. On failure the caller discards the unit of work and
//! restores the continuum cache from its pre-turn snapshot.

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use mnemon_domain::error::{Error, Result};
use mnemon_memory::log::{self, RetrievalLogEntry};

use crate::continuum::{Continuum, StoredMessage};
use crate::repository::ContinuumRepository;

pub struct UnitOfWork {
    conn: Arc<Mutex<Connection>>,
    pending_messages: Vec<(StoredMessage, StoredMessage)>,
    metadata_dirty: bool,
    retrieval_entry: Option<RetrievalLogEntry>,
    committed: bool,
}

impl UnitOfWork {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            pending_messages: Vec::new(),
            metadata_dirty: false,
            retrieval_entry: None,
            committed: false,
        }
    }

    /// Stage the turn's user + assistant pair. Auto-continuation stages a
    /// second pair on the same unit of work.
    pub fn add_messages(&mut self, user: StoredMessage, assistant: StoredMessage) {
        self.pending_messages.push((user, assistant));
    }

    pub fn mark_metadata_updated(&mut self) {
        self.metadata_dirty = true;
    }

    pub fn stage_retrieval_log(&mut self, entry: RetrievalLogEntry) {
        self.retrieval_entry = Some(entry);
    }

    pub fn has_pending_messages(&self) -> bool {
        !self.pending_messages.is_empty()
    }

    /// Commit everything in a single transaction. The continuum provides
    /// identity and (when dirty) the metadata to persist.
    pub fn commit(mut self, continuum: &Continuum) -> Result<()> {
        if self.pending_messages.is_empty() {
            return Err(Error::Logic(
                "unit of work committed with no staged messages".into(),
            ));
        }
        for (user, assistant) in &self.pending_messages {
            if user.content.is_blank() || assistant.content.is_blank() {
                return Err(Error::Validation(
                    "refusing to commit a blank message".into(),
                ));
            }
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| Error::Sql(e.to_string()))?;

        for (user, assistant) in &self.pending_messages {
            ContinuumRepository::insert_message(&tx, continuum.id, &continuum.user_id, user)?;
            ContinuumRepository::insert_message(&tx, continuum.id, &continuum.user_id, assistant)?;
        }

        if self.metadata_dirty {
            ContinuumRepository::update_metadata(&tx, continuum.id, &continuum.metadata)?;
        }

        if let Some(entry) = &self.retrieval_entry {
            log::insert_entry(&tx, entry)?;
        }

        tx.commit().map_err(|e| Error::Sql(e.to_string()))?;
        self.committed = true;
        tracing::debug!(
            continuum_id = %continuum.id,
            pairs = self.pending_messages.len(),
            metadata = self.metadata_dirty,
            "unit of work committed"
        );
        Ok(())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.committed && !self.pending_messages.is_empty() {
            tracing::warn!(
                pairs = self.pending_messages.len(),
                "unit of work discarded with staged writes"
            );
        }
    }
}
