//! Shared domain types for the Mnemon workspace: the error type, the
//! configuration tree, message/content sum types, provider stream events,
//! tool definitions, and the touchstone.

pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod tool;
pub mod touchstone;
