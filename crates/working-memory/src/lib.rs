//! Working memory: the event-driven system prompt composer and its
//! trinkets.

pub mod composer;
pub mod core;
pub mod trinkets;

pub use composer::{ComposedPrompt, Composer};
pub use core::{Trinket, WorkingMemory};
pub use trinkets::{
    DeferredResults, DeferredResultsTrinket, DomainKnowledgeTrinket, ManifestTrinket,
    ProactiveMemoryTrinket, Reminder, ReminderSurface, ReminderTrinket,
};
