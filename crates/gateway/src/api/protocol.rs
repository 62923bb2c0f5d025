//! JSON frame types for the chat channel.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Must be the first frame on the connection.
    Auth { token: Option<String> },
    Ping,
    Message {
        content: String,
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        image_type: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthSuccess {
        user_id: String,
    },
    Pong,
    Text {
        content: String,
    },
    Thinking {
        content: String,
    },
    Tool {
        event: &'static str,
        name: String,
    },
    Error {
        message: String,
    },
    Complete {
        continuum_id: Uuid,
        response: String,
        metadata: CompleteMetadata,
    },
    ServerShutdown {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteMetadata {
    pub tools_used: Vec<String>,
    pub processing_time_ms: u64,
}
