use serde::{Deserialize, Serialize};

/// Gateway server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_bind")]
    pub bind: String,
    /// Env var holding the HMAC secret for session tokens.
    #[serde(default = "d_auth_secret_env")]
    pub auth_secret_env: String,
    /// Path to the base system prompt file.
    #[serde(default = "d_system_prompt_path")]
    pub system_prompt_path: String,
    /// SQLite database path.
    #[serde(default = "d_db_path")]
    pub db_path: String,
    /// IANA timezone used when rendering times to the user.
    #[serde(default = "d_timezone")]
    pub timezone: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: d_bind(),
            auth_secret_env: d_auth_secret_env(),
            system_prompt_path: d_system_prompt_path(),
            db_path: d_db_path(),
            timezone: d_timezone(),
        }
    }
}

/// KV substrate (cache + distributed lock) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    #[serde(default = "d_kv_url")]
    pub url: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self { url: d_kv_url() }
    }
}

fn d_bind() -> String {
    "127.0.0.1:8420".into()
}
fn d_auth_secret_env() -> String {
    "MNEMON_AUTH_SECRET".into()
}
fn d_system_prompt_path() -> String {
    "config/system_prompt.txt".into()
}
fn d_db_path() -> String {
    "data/mnemon.db".into()
}
fn d_kv_url() -> String {
    "redis://127.0.0.1:6379".into()
}
fn d_timezone() -> String {
    "UTC".into()
}
