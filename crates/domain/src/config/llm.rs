use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Primary endpoint (Anthropic-style messages API).
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Env var holding the primary API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// Default tier: supports extended thinking.
    #[serde(default = "d_reasoning_model")]
    pub reasoning_model: String,
    /// Cheaper tier, used one turn after a simple tool call.
    #[serde(default = "d_execution_model")]
    pub execution_model: String,
    /// Tool names whose results don't need the reasoning tier next call.
    #[serde(default)]
    pub simple_tools: HashSet<String>,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "d_true")]
    pub enable_prompt_caching: bool,
    #[serde(default)]
    pub extended_thinking: bool,
    #[serde(default = "d_thinking_budget")]
    pub extended_thinking_budget: u32,
    /// Tool-loop circuit breaker: maximum loop iterations.
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    /// The tool that loads other tools on demand; invoking it with mode
    /// `load` or `fallback` triggers one auto-continuation turn.
    #[serde(default = "d_tool_loader")]
    pub tool_loader_tool_name: String,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            api_key_env: d_api_key_env(),
            reasoning_model: d_reasoning_model(),
            execution_model: d_execution_model(),
            simple_tools: HashSet::new(),
            max_tokens: d_max_tokens(),
            temperature: d_temperature(),
            timeout_secs: d_timeout_secs(),
            enable_prompt_caching: true,
            extended_thinking: false,
            extended_thinking_budget: d_thinking_budget(),
            max_iterations: d_max_iterations(),
            tool_loader_tool_name: d_tool_loader(),
            failover: FailoverConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

/// Emergency fallback routed through the OpenAI-compatible translator when
/// the primary endpoint is down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "d_recovery_delay")]
    pub recovery_delay_seconds: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            api_key_env: String::new(),
            model: String::new(),
            recovery_delay_seconds: d_recovery_delay(),
        }
    }
}

/// Fast-model path used for touchstone and fingerprint generation. Bypasses
/// the main reasoning model entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "d_analysis_model")]
    pub model: String,
    #[serde(default = "d_analysis_key_env")]
    pub api_key_env: String,
    /// User/assistant pairs of context for the touchstone call.
    #[serde(default = "d_context_pairs")]
    pub context_pairs: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: String::new(),
            model: d_analysis_model(),
            api_key_env: d_analysis_key_env(),
            context_pairs: d_context_pairs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn d_api_key_env() -> String {
    "MNEMON_LLM_API_KEY".into()
}
fn d_reasoning_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn d_execution_model() -> String {
    "claude-3-5-haiku-20241022".into()
}
fn d_analysis_model() -> String {
    "llama-3.1-8b-instant".into()
}
fn d_analysis_key_env() -> String {
    "MNEMON_ANALYSIS_API_KEY".into()
}
fn d_max_tokens() -> u32 {
    4096
}
fn d_temperature() -> f32 {
    0.7
}
fn d_timeout_secs() -> u64 {
    120
}
fn d_thinking_budget() -> u32 {
    4096
}
fn d_max_iterations() -> u32 {
    10
}
fn d_recovery_delay() -> u64 {
    300
}
fn d_context_pairs() -> usize {
    4
}
fn d_tool_loader() -> String {
    "invokeother_tool".into()
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failover_disabled_by_default() {
        let config = LlmConfig::default();
        assert!(!config.failover.enabled);
        assert_eq!(config.failover.recovery_delay_seconds, 300);
    }

    #[test]
    fn simple_tools_deserialize() {
        let config: LlmConfig = toml::from_str(
            r#"
            simple_tools = ["get_weather", "get_time"]
            "#,
        )
        .unwrap();
        assert!(config.simple_tools.contains("get_weather"));
        assert_eq!(config.simple_tools.len(), 2);
    }
}
