//! Reminder trinket: surfaces due and upcoming reminders in the user's
//! timezone. Volatile by nature, so never cached.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mnemon_domain::error::Result;

use crate::core::Trinket;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub user_id: String,
    pub text: String,
    pub due_at: DateTime<Utc>,
}

/// In-process reminder surface shared between the trinket and whatever
/// tool maintains reminders.
#[derive(Default)]
pub struct ReminderSurface {
    reminders: RwLock<Vec<Reminder>>,
}

impl ReminderSurface {
    pub fn add(&self, user_id: &str, text: &str, due_at: DateTime<Utc>) -> Uuid {
        let reminder = Reminder {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            due_at,
        };
        let id = reminder.id;
        self.reminders.write().push(reminder);
        id
    }

    pub fn remove(&self, id: Uuid) {
        self.reminders.write().retain(|r| r.id != id);
    }

    pub fn active_for(&self, user_id: &str) -> Vec<Reminder> {
        let mut reminders: Vec<Reminder> = self
            .reminders
            .read()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        reminders.sort_by_key(|r| r.due_at);
        reminders
    }
}

pub struct ReminderTrinket {
    surface: std::sync::Arc<ReminderSurface>,
    timezone: Tz,
}

impl ReminderTrinket {
    pub fn new(surface: std::sync::Arc<ReminderSurface>, timezone: Tz) -> Self {
        Self { surface, timezone }
    }
}

impl Trinket for ReminderTrinket {
    fn name(&self) -> &'static str {
        "ReminderTrinket"
    }

    fn variable_name(&self) -> &'static str {
        "active_reminders"
    }

    fn cache_policy(&self) -> bool {
        false
    }

    fn generate_content(&self, context: &serde_json::Value) -> Result<String> {
        let Some(user_id) = context.get("user_id").and_then(|v| v.as_str()) else {
            return Ok(String::new());
        };
        let reminders = self.surface.active_for(user_id);
        if reminders.is_empty() {
            return Ok(String::new());
        }

        let now = Utc::now();
        let mut lines = vec!["## Active reminders".to_string()];
        for reminder in reminders {
            let local = reminder.due_at.with_timezone(&self.timezone);
            let marker = if reminder.due_at <= now { " (due now)" } else { "" };
            lines.push(format!(
                "- {} — {}{marker}",
                local.format("%a %b %-d, %-I:%M %p %Z"),
                reminder.text
            ));
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn renders_in_user_timezone_sorted_by_due() {
        let surface = Arc::new(ReminderSurface::default());
        let later = Utc::now() + chrono::Duration::hours(30);
        let sooner = Utc::now() + chrono::Duration::hours(2);
        surface.add("u1", "call the vet", later);
        surface.add("u1", "submit invoice", sooner);
        surface.add("someone_else", "not yours", sooner);

        let trinket = ReminderTrinket::new(surface, chrono_tz::America::Detroit);
        let content = trinket
            .generate_content(&serde_json::json!({"user_id": "u1"}))
            .unwrap();

        let invoice = content.find("submit invoice").unwrap();
        let vet = content.find("call the vet").unwrap();
        assert!(invoice < vet, "sooner reminder listed first");
        assert!(!content.contains("not yours"));
        // Timezone abbreviation from the configured zone.
        assert!(content.contains("EDT") || content.contains("EST"));
    }

    #[test]
    fn no_reminders_renders_nothing() {
        let surface = Arc::new(ReminderSurface::default());
        let trinket = ReminderTrinket::new(surface, chrono_tz::UTC);
        let content = trinket
            .generate_content(&serde_json::json!({"user_id": "u1"}))
            .unwrap();
        assert!(content.is_empty());
    }

    #[test]
    fn overdue_reminders_are_flagged() {
        let surface = Arc::new(ReminderSurface::default());
        surface.add("u1", "water plants", Utc::now() - chrono::Duration::hours(1));
        let trinket = ReminderTrinket::new(surface, chrono_tz::UTC);
        let content = trinket
            .generate_content(&serde_json::json!({"user_id": "u1"}))
            .unwrap();
        assert!(content.contains("(due now)"));
    }
}
