//! Event-driven working memory coordinator.
//!
//! Routes `UpdateTrinket` events to registered trinkets, collects their
//! `TrinketContent` sections, and answers `ComposeSystemPrompt` with a
//! `SystemPromptComposed` event — all synchronously on the publishing
//! thread. The orchestrator and the trinkets never import each other;
//! this module and the event contract sit between them.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use mnemon_bus::{Event, EventBus, EventPayload};
use mnemon_domain::error::Result;

use crate::composer::Composer;

/// A pluggable contributor to the system prompt.
///
/// `generate_content` runs synchronously during prompt composition; it
/// must read from state the trinket already holds. Returning an empty
/// string publishes nothing. Errors propagate to the bus, which isolates
/// and logs them without aborting composition.
pub trait Trinket: Send + Sync {
    /// Dispatch name, e.g. `"ProactiveMemoryTrinket"`.
    fn name(&self) -> &'static str;
    /// Section name in the composed prompt.
    fn variable_name(&self) -> &'static str;
    /// Whether this trinket's content belongs in the cached block.
    fn cache_policy(&self) -> bool;
    fn generate_content(&self, context: &serde_json::Value) -> Result<String>;
}

pub struct WorkingMemory {
    bus: Arc<EventBus>,
    composer: Mutex<Composer>,
    trinkets: RwLock<Vec<Arc<dyn Trinket>>>,
    /// Serializes whole compositions so concurrent turns for different
    /// users cannot interleave each other's sections.
    compose_guard: Mutex<()>,
}

impl WorkingMemory {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        let wm = Arc::new(Self {
            bus: bus.clone(),
            composer: Mutex::new(Composer::default()),
            trinkets: RwLock::new(Vec::new()),
            compose_guard: Mutex::new(()),
        });

        let compose = wm.clone();
        bus.subscribe("ComposeSystemPrompt", move |event| {
            compose.handle_compose(event)
        });
        let update = wm.clone();
        bus.subscribe("UpdateTrinket", move |event| update.handle_update(event));
        let content = wm.clone();
        bus.subscribe("TrinketContent", move |event| content.handle_content(event));

        wm
    }

    pub fn register_trinket(&self, trinket: Arc<dyn Trinket>) {
        tracing::info!(trinket = trinket.name(), "trinket registered");
        self.trinkets.write().push(trinket);
    }

    pub fn trinket_names(&self) -> Vec<&'static str> {
        self.trinkets.read().iter().map(|t| t.name()).collect()
    }

    // ── Event handlers ─────────────────────────────────────────────

    fn handle_compose(&self, event: &Event) -> Result<()> {
        let EventPayload::ComposeSystemPrompt { base_prompt, user_id } = &event.payload else {
            return Ok(());
        };
        let _guard = self.compose_guard.lock();

        {
            let mut composer = self.composer.lock();
            composer.set_base_prompt(base_prompt);
            composer.clear_sections();
        }

        // Fan out synchronously; each trinket's content arrives back as a
        // TrinketContent event before this loop continues.
        for name in self.trinket_names() {
            self.bus.publish(
                event.continuum_id,
                EventPayload::UpdateTrinket {
                    target_trinket: name.to_string(),
                    context: serde_json::json!({ "user_id": user_id }),
                },
            );
        }

        let prompt = self.composer.lock().compose();
        tracing::debug!(
            cached_chars = prompt.cached_content.len(),
            dynamic_chars = prompt.non_cached_content.len(),
            "system prompt composed"
        );
        self.bus.publish(
            event.continuum_id,
            EventPayload::SystemPromptComposed {
                cached_content: prompt.cached_content,
                non_cached_content: prompt.non_cached_content,
            },
        );
        Ok(())
    }

    fn handle_update(&self, event: &Event) -> Result<()> {
        let EventPayload::UpdateTrinket { target_trinket, context } = &event.payload else {
            return Ok(());
        };

        let trinket = self
            .trinkets
            .read()
            .iter()
            .find(|t| t.name() == target_trinket)
            .cloned();
        let Some(trinket) = trinket else {
            tracing::warn!(target = %target_trinket, "no trinket registered under that name");
            return Ok(());
        };

        let content = trinket.generate_content(context)?;
        if content.trim().is_empty() {
            return Ok(());
        }
        self.bus.publish(
            event.continuum_id,
            EventPayload::TrinketContent {
                variable_name: trinket.variable_name().to_string(),
                content,
                cache_policy: trinket.cache_policy(),
                trinket_name: trinket.name().to_string(),
            },
        );
        Ok(())
    }

    fn handle_content(&self, event: &Event) -> Result<()> {
        let EventPayload::TrinketContent {
            variable_name,
            content,
            cache_policy,
            ..
        } = &event.payload
        else {
            return Ok(());
        };
        self.composer
            .lock()
            .add_section(variable_name, content, *cache_policy);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_domain::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct StaticTrinket {
        name: &'static str,
        variable: &'static str,
        cached: bool,
        content: String,
    }

    impl Trinket for StaticTrinket {
        fn name(&self) -> &'static str {
            self.name
        }
        fn variable_name(&self) -> &'static str {
            self.variable
        }
        fn cache_policy(&self) -> bool {
            self.cached
        }
        fn generate_content(&self, _context: &serde_json::Value) -> Result<String> {
            Ok(self.content.clone())
        }
    }

    struct FailingTrinket;

    impl Trinket for FailingTrinket {
        fn name(&self) -> &'static str {
            "FailingTrinket"
        }
        fn variable_name(&self) -> &'static str {
            "failing_section"
        }
        fn cache_policy(&self) -> bool {
            false
        }
        fn generate_content(&self, _context: &serde_json::Value) -> Result<String> {
            Err(Error::Kv("valkey is down".into()))
        }
    }

    /// Captures SystemPromptComposed output for assertions.
    fn capture_composed(bus: &Arc<EventBus>) -> Arc<Mutex<Option<(String, String)>>> {
        let slot = Arc::new(Mutex::new(None));
        let writer = slot.clone();
        bus.subscribe("SystemPromptComposed", move |event| {
            if let EventPayload::SystemPromptComposed {
                cached_content,
                non_cached_content,
            } = &event.payload
            {
                *writer.lock() = Some((cached_content.clone(), non_cached_content.clone()));
            }
            Ok(())
        });
        slot
    }

    fn compose(bus: &Arc<EventBus>) {
        bus.publish(
            Uuid::new_v4(),
            EventPayload::ComposeSystemPrompt {
                base_prompt: "You are Mnemon.".into(),
                user_id: "u1".into(),
            },
        );
    }

    #[test]
    fn compose_collects_sections_into_two_blocks() {
        let bus = Arc::new(EventBus::new());
        let wm = WorkingMemory::new(bus.clone());
        wm.register_trinket(Arc::new(StaticTrinket {
            name: "GuidanceTrinket",
            variable: "guidance",
            cached: true,
            content: "Be concise.".into(),
        }));
        wm.register_trinket(Arc::new(StaticTrinket {
            name: "RemindersTrinket",
            variable: "reminders",
            cached: false,
            content: "Dentist at 3pm.".into(),
        }));

        let slot = capture_composed(&bus);
        compose(&bus);

        let (cached, dynamic) = slot.lock().clone().unwrap();
        assert_eq!(cached, "You are Mnemon.\n\nBe concise.");
        assert_eq!(dynamic, "Dentist at 3pm.");
    }

    #[test]
    fn failing_trinket_does_not_abort_composition() {
        let bus = Arc::new(EventBus::new());
        let wm = WorkingMemory::new(bus.clone());
        wm.register_trinket(Arc::new(FailingTrinket));
        wm.register_trinket(Arc::new(StaticTrinket {
            name: "SurvivorTrinket",
            variable: "survivor",
            cached: false,
            content: "still here".into(),
        }));

        let slot = capture_composed(&bus);
        compose(&bus);

        let (_, dynamic) = slot.lock().clone().unwrap();
        assert_eq!(dynamic, "still here");
    }

    #[test]
    fn empty_content_publishes_no_section() {
        let bus = Arc::new(EventBus::new());
        let wm = WorkingMemory::new(bus.clone());
        wm.register_trinket(Arc::new(StaticTrinket {
            name: "SilentTrinket",
            variable: "silent",
            cached: false,
            content: "   ".into(),
        }));

        let slot = capture_composed(&bus);
        compose(&bus);

        let (cached, dynamic) = slot.lock().clone().unwrap();
        assert_eq!(cached, "You are Mnemon.");
        assert!(dynamic.is_empty());
    }

    #[test]
    fn recompose_clears_previous_sections() {
        let bus = Arc::new(EventBus::new());
        let wm = WorkingMemory::new(bus.clone());
        wm.register_trinket(Arc::new(StaticTrinket {
            name: "OnceTrinket",
            variable: "once",
            cached: false,
            content: "fresh".into(),
        }));

        let slot = capture_composed(&bus);
        compose(&bus);
        compose(&bus);

        let (_, dynamic) = slot.lock().clone().unwrap();
        // Not duplicated across compositions.
        assert_eq!(dynamic, "fresh");
    }

    #[test]
    fn unregistered_target_is_ignored() {
        let bus = Arc::new(EventBus::new());
        let _wm = WorkingMemory::new(bus.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        bus.subscribe("TrinketContent", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(
            Uuid::new_v4(),
            EventPayload::UpdateTrinket {
                target_trinket: "GhostTrinket".into(),
                context: serde_json::json!({}),
            },
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
