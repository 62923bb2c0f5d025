//! LLM provider abstraction: a native messages-API adapter, an
//! OpenAI-compatible translator for the emergency and analysis paths,
//! model tiering, the tool loop with its circuit breaker, and
//! process-wide failover.

mod breaker;
mod failover;
mod native;
mod openai_compat;
mod provider;
mod request;
mod sse;

pub use breaker::{BreakReason, BreakerState};
pub use failover::FailoverState;
pub use native::NativeAdapter;
pub use openai_compat::OpenAiCompatAdapter;
pub use provider::{GenerateOverrides, LlmProvider, StreamOptions, ToolExecutor};
pub use request::{validate_messages, ProviderRequest};
