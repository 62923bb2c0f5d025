//! Deferred-results trinket.
//!
//! Long-running context searches run off-turn; their results land in a
//! shared mailbox keyed by task id and surface in the next composed
//! prompt, then clear.

use std::collections::HashMap;

use parking_lot::Mutex;

use mnemon_domain::error::Result;

use crate::core::Trinket;

/// Mailbox shared between the deferred-search executor (writer) and the
/// trinket (drainer).
#[derive(Default)]
pub struct DeferredResults {
    results: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl DeferredResults {
    /// Record a completed task's result for a user.
    pub fn deliver(&self, user_id: &str, task_id: &str, content: &str) {
        self.results
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .push((task_id.to_string(), content.to_string()));
    }

    fn drain(&self, user_id: &str) -> Vec<(String, String)> {
        self.results.lock().remove(user_id).unwrap_or_default()
    }
}

pub struct DeferredResultsTrinket {
    mailbox: std::sync::Arc<DeferredResults>,
}

impl DeferredResultsTrinket {
    pub fn new(mailbox: std::sync::Arc<DeferredResults>) -> Self {
        Self { mailbox }
    }
}

impl Trinket for DeferredResultsTrinket {
    fn name(&self) -> &'static str {
        "DeferredResultsTrinket"
    }

    fn variable_name(&self) -> &'static str {
        "deferred_search_results"
    }

    fn cache_policy(&self) -> bool {
        false
    }

    fn generate_content(&self, context: &serde_json::Value) -> Result<String> {
        let Some(user_id) = context.get("user_id").and_then(|v| v.as_str()) else {
            return Ok(String::new());
        };
        let delivered = self.mailbox.drain(user_id);
        if delivered.is_empty() {
            return Ok(String::new());
        }

        let mut lines = vec!["## Completed background searches".to_string()];
        for (task_id, content) in delivered {
            lines.push(format!("### Task {task_id}\n{content}"));
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn delivered_results_surface_once() {
        let mailbox = Arc::new(DeferredResults::default());
        mailbox.deliver("u1", "task-9", "found three matching notes");
        let trinket = DeferredResultsTrinket::new(mailbox);

        let context = serde_json::json!({"user_id": "u1"});
        let first = trinket.generate_content(&context).unwrap();
        assert!(first.contains("task-9"));
        assert!(first.contains("three matching notes"));

        // Drained after surfacing.
        let second = trinket.generate_content(&context).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn results_are_user_scoped() {
        let mailbox = Arc::new(DeferredResults::default());
        mailbox.deliver("someone_else", "task-1", "not for you");
        let trinket = DeferredResultsTrinket::new(mailbox);
        let content = trinket
            .generate_content(&serde_json::json!({"user_id": "u1"}))
            .unwrap();
        assert!(content.is_empty());
    }
}
