//! Shared domain types for trellis.
//!
//! Everything the other crates agree on lives here: the tagged error type,
//! the provider-agnostic chat message model, tool catalog entries, the
//! configuration tree, and the ambient request context that travels with
//! every provider call.

pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod tool;

pub use chat::{ChatMessage, Role, ToolCall, ToolDefinition, Usage};
pub use config::{Config, SchedulerConfig, ToolMergeStrategy};
pub use context::RequestContext;
pub use error::{Error, Result};
pub use tool::{ToolSpec, ToolStatus};
