mod deferred;
mod knowledge;
mod manifest;
mod proactive;
mod reminders;

pub use deferred::{DeferredResults, DeferredResultsTrinket};
pub use knowledge::DomainKnowledgeTrinket;
pub use manifest::ManifestTrinket;
pub use proactive::ProactiveMemoryTrinket;
pub use reminders::{Reminder, ReminderSurface, ReminderTrinket};
