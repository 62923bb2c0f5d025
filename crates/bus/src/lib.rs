//! Synchronous in-process event bus.
//!
//! Handlers are keyed by event type name and run in registration order on
//! the publishing thread. A failing handler is logged and isolated; the
//! remaining handlers still run. This is the seam that keeps the
//! orchestrator, working memory, and trinkets from importing each other:
//! only the event contract is shared.

pub mod events;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use mnemon_domain::error::Result;

pub use events::{Event, EventPayload};

type Handler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// In-process, synchronous publish/subscribe dispatcher.
pub struct EventBus {
    handlers: RwLock<HashMap<&'static str, Vec<Handler>>>,
    seq: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Register a handler for one event type. Registration order is
    /// invocation order.
    pub fn subscribe<F>(&self, type_name: &'static str, handler: F)
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(type_name)
            .or_default()
            .push(Arc::new(handler));
        tracing::debug!(event_type = type_name, "handler subscribed");
    }

    /// Publish an event to every subscribed handler, synchronously.
    ///
    /// Each handler runs in an isolated frame: a failure is logged (with
    /// the category inferred from the error kind) and dispatch continues.
    /// Handlers may publish further events from inside their frame.
    pub fn publish(&self, continuum_id: Uuid, payload: EventPayload) -> Event {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            continuum_id,
            payload,
        };

        // Snapshot the handler list so nested publishes don't contend with
        // the registry lock.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .get(event.payload.type_name())
            .map(|hs| hs.to_vec())
            .unwrap_or_default();

        for handler in handlers {
            if let Err(e) = handler(&event) {
                let category = if e.is_infrastructure() {
                    "infrastructure"
                } else {
                    "logic"
                };
                tracing::error!(
                    event_type = event.payload.type_name(),
                    seq = event.seq,
                    category,
                    error = %e,
                    "event handler failed"
                );
            }
        }

        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_domain::error::Error;
    use std::sync::atomic::AtomicUsize;

    fn turn_completed(n: u32) -> EventPayload {
        EventPayload::TurnCompleted {
            user_id: "u1".into(),
            turn_number: n,
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe("TurnCompleted", move |_| {
                order.lock().push(tag);
                Ok(())
            });
        }

        bus.publish(Uuid::new_v4(), turn_completed(1));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_handler_does_not_abort_the_rest() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe("TurnCompleted", |_| {
            Err(Error::Kv("connection refused".into()))
        });
        let hits2 = hits.clone();
        bus.subscribe("TurnCompleted", move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(Uuid::new_v4(), turn_completed(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sequence_ids_are_monotonic() {
        let bus = EventBus::new();
        let cid = Uuid::new_v4();
        let a = bus.publish(cid, turn_completed(1));
        let b = bus.publish(cid, turn_completed(2));
        assert!(b.seq > a.seq);
    }

    #[test]
    fn handlers_may_publish_nested_events() {
        let bus = Arc::new(EventBus::new());
        let saw_nested = Arc::new(AtomicUsize::new(0));

        let bus2 = bus.clone();
        bus.subscribe("ComposeSystemPrompt", move |event| {
            bus2.publish(
                event.continuum_id,
                EventPayload::SystemPromptComposed {
                    cached_content: "base".into(),
                    non_cached_content: String::new(),
                },
            );
            Ok(())
        });
        let saw = saw_nested.clone();
        bus.subscribe("SystemPromptComposed", move |_| {
            saw.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(
            Uuid::new_v4(),
            EventPayload::ComposeSystemPrompt {
                base_prompt: "You are Mnemon.".into(),
                user_id: "u1".into(),
            },
        );
        assert_eq!(saw_nested.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribed_type_is_a_noop() {
        let bus = EventBus::new();
        bus.publish(Uuid::new_v4(), turn_completed(1));
    }
}
