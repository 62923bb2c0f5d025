//! Tool registry and the executor handed to the provider's tool loop.
//!
//! Tools register as loaded (advertised immediately) or on-demand
//! (loadable through the tool-loader tool). The loader itself is a
//! synthetic tool the registry answers internally; invoking it with mode
//! `load` or `fallback` is what triggers the orchestrator's
//! auto-continuation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use mnemon_domain::error::{Error, Result};
use mnemon_domain::tool::{ToolCall, ToolDefinition};
use mnemon_providers::ToolExecutor;

/// A pluggable tool. Side effects are the implementation's business.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, user_id: &str, arguments: &Value) -> Result<String>;
}

pub struct ToolRegistry {
    loader_tool_name: String,
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    loaded: RwLock<HashSet<String>>,
}

impl ToolRegistry {
    pub fn new(loader_tool_name: &str) -> Self {
        Self {
            loader_tool_name: loader_tool_name.to_string(),
            tools: RwLock::new(HashMap::new()),
            loaded: RwLock::new(HashSet::new()),
        }
    }

    pub fn register(&self, tool: Arc<dyn Tool>, loaded: bool) {
        let name = tool.definition().name;
        if loaded {
            self.loaded.write().insert(name.clone());
        }
        tracing::info!(tool = %name, loaded, "tool registered");
        self.tools.write().insert(name, tool);
    }

    /// Definitions of currently loaded tools, plus the loader when any
    /// unloaded tools remain.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        let loaded = self.loaded.read();
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|t| t.definition())
            .filter(|d| loaded.contains(&d.name))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));

        let unloaded: Vec<String> = tools
            .keys()
            .filter(|name| !loaded.contains(*name))
            .cloned()
            .collect();
        if !unloaded.is_empty() {
            defs.push(self.loader_definition(&unloaded));
        }
        defs
    }

    fn loader_definition(&self, unloaded: &[String]) -> ToolDefinition {
        ToolDefinition {
            name: self.loader_tool_name.clone(),
            description: format!(
                "Load another tool so it becomes available for use. \
                 Loadable tools: {}.",
                unloaded.join(", ")
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "tool_name": {"type": "string"},
                    "mode": {"type": "string", "enum": ["load", "fallback"]},
                },
                "required": ["tool_name", "mode"],
            }),
        }
    }

    fn load(&self, tool_name: &str) -> Result<String> {
        if !self.tools.read().contains_key(tool_name) {
            return Err(Error::Validation(format!("no tool named '{tool_name}'")));
        }
        self.loaded.write().insert(tool_name.to_string());
        Ok(format!("Tool '{tool_name}' is now loaded and available."))
    }

    async fn dispatch(&self, user_id: &str, call: &ToolCall) -> Result<String> {
        if call.tool_name == self.loader_tool_name {
            let target = call
                .arguments
                .get("tool_name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Validation("tool loader needs a tool_name".into()))?;
            return self.load(target);
        }

        let tool = self
            .tools
            .read()
            .get(&call.tool_name)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("unknown tool '{}'", call.tool_name)))?;
        if !self.loaded.read().contains(&call.tool_name) {
            return Err(Error::Validation(format!(
                "tool '{}' is not loaded",
                call.tool_name
            )));
        }
        tool.execute(user_id, &call.arguments).await
    }
}

/// Binds the registry to a user for the duration of one turn.
pub struct RegistryExecutor {
    registry: Arc<ToolRegistry>,
    user_id: String,
}

impl RegistryExecutor {
    pub fn new(registry: Arc<ToolRegistry>, user_id: &str) -> Self {
        Self {
            registry,
            user_id: user_id.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ToolExecutor for RegistryExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<String> {
        self.registry.dispatch(&self.user_id, call).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Creates reminders on the shared reminder surface.
pub struct SetReminderTool {
    surface: Arc<mnemon_working_memory::ReminderSurface>,
}

impl SetReminderTool {
    pub fn new(surface: Arc<mnemon_working_memory::ReminderSurface>) -> Self {
        Self { surface }
    }
}

#[async_trait::async_trait]
impl Tool for SetReminderTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "set_reminder".into(),
            description: "Create a reminder for the user at a specific UTC time.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "due_at": {"type": "string", "description": "RFC 3339 timestamp"},
                },
                "required": ["text", "due_at"],
            }),
        }
    }

    async fn execute(&self, user_id: &str, arguments: &Value) -> Result<String> {
        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("reminder needs text".into()))?;
        let due_raw = arguments
            .get("due_at")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("reminder needs due_at".into()))?;
        let due_at = chrono::DateTime::parse_from_rfc3339(due_raw)
            .map_err(|e| Error::Validation(format!("bad due_at '{due_raw}': {e}")))?
            .with_timezone(&chrono::Utc);

        self.surface.add(user_id, text, due_at);
        Ok(format!("Reminder set for {due_raw}: {text}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopTool {
        name: &'static str,
    }

    #[async_trait::async_trait]
    impl Tool for NoopTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.into(),
                description: "does nothing".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }
        async fn execute(&self, _user_id: &str, _arguments: &Value) -> Result<String> {
            Ok("done".into())
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn loader_advertised_only_while_unloaded_tools_exist() {
        let registry = ToolRegistry::new("invokeother_tool");
        registry.register(Arc::new(NoopTool { name: "alpha" }), true);
        registry.register(Arc::new(NoopTool { name: "beta" }), false);

        let defs = registry.definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"alpha"));
        assert!(!names.contains(&"beta"));
        assert!(names.contains(&"invokeother_tool"));

        registry
            .dispatch(
                "u1",
                &call(
                    "invokeother_tool",
                    serde_json::json!({"tool_name": "beta", "mode": "load"}),
                ),
            )
            .await
            .unwrap();

        let names: Vec<String> = registry.definitions().iter().map(|d| d.name.clone()).collect();
        assert!(names.contains(&"beta".to_string()));
        assert!(!names.contains(&"invokeother_tool".to_string()));
    }

    #[tokio::test]
    async fn unloaded_tool_cannot_execute() {
        let registry = ToolRegistry::new("invokeother_tool");
        registry.register(Arc::new(NoopTool { name: "gamma" }), false);
        let err = registry
            .dispatch("u1", &call("gamma", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn loading_unknown_tool_fails() {
        let registry = ToolRegistry::new("invokeother_tool");
        let err = registry
            .dispatch(
                "u1",
                &call(
                    "invokeother_tool",
                    serde_json::json!({"tool_name": "ghost", "mode": "load"}),
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
