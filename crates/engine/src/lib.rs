//! The trellis engine — per-message turn loop, background summarization
//! scheduler, and the runtime value that wires every component together.
//!
//! Entry points: [`Runtime::start`] for a fully wired runtime, or
//! [`turn::process_message`] / [`scheduler::tick`] against a hand-built
//! [`RuntimeState`] when embedding.

pub mod cancel;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod summarizer;
pub mod turn;

pub use cancel::{CancelMap, CancelToken};
pub use runtime::Runtime;
pub use state::RuntimeState;
pub use turn::{process_message, TurnOutcome};

use std::sync::Arc;

use trellis_domain::error::{Error, Result};
use trellis_knowledge::Node;
use trellis_providers::ChatProvider;
use trellis_tools::ToolRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Derive a session's system prompt from its anchor node.
pub(crate) fn build_system_prompt(node: &Node) -> String {
    let mut prompt = String::new();
    if !node.title.is_empty() {
        prompt.push_str("# ");
        prompt.push_str(&node.title);
        prompt.push_str("\n\n");
    }
    if !node.description.is_empty() {
        prompt.push_str(&node.description);
        prompt.push_str("\n\n");
    }
    if !node.content.is_empty() {
        prompt.push_str(&node.content);
    } else if !node.summary.is_empty() {
        prompt.push_str(&node.summary);
    }

    let prompt = prompt.trim_end().to_owned();
    if prompt.is_empty() {
        "You are a helpful assistant.".into()
    } else {
        prompt
    }
}

/// Expand a tree key into the chain of paths from the root down,
/// e.g. `"root/a/b"` → `["root", "root/a", "root/a/b"]`.
pub(crate) fn path_chain(node_path: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = String::new();
    for segment in node_path.split('/') {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        chain.push(current.clone());
    }
    chain
}

/// Accumulate the tool catalog along the root → node walk, applying the
/// configured merge strategy at each step.
pub(crate) async fn build_catalog(
    state: &RuntimeState,
    node_path: &str,
) -> Result<ToolRegistry> {
    let mut catalog = ToolRegistry::new(state.config.tool_strategy);
    for path in path_chain(node_path) {
        let node = state.repository.load_node(&path).await?;
        catalog.merge(&node.tools)?;
    }
    Ok(catalog)
}

/// Resolve the chat provider for a turn: session model override, then the
/// "chat" role, then any registered provider.
pub(crate) fn resolve_chat_provider(
    state: &RuntimeState,
    session_model: Option<&str>,
) -> Result<(Arc<dyn ChatProvider>, Option<String>)> {
    if let Some(spec) = session_model {
        if let Some(resolved) = state.providers.resolve_spec(spec) {
            return Ok(resolved);
        }
        tracing::warn!(spec, "session model does not resolve, falling back");
    }
    if let Some(resolved) = state.providers.for_role("chat") {
        return Ok(resolved);
    }
    if let Some(provider) = state.providers.any() {
        return Ok((provider, None));
    }
    Err(Error::Config("no chat provider configured".into()))
}

/// Resolve the summarizer provider: scheduler `summary_model`, then the
/// "summarizer" role, then whatever the session's turns use.
pub(crate) fn resolve_summary_provider(
    state: &RuntimeState,
    session_model: Option<&str>,
) -> Result<(Arc<dyn ChatProvider>, Option<String>)> {
    if let Some(spec) = &state.config.scheduler.summary_model {
        if let Some(resolved) = state.providers.resolve_spec(spec) {
            return Ok(resolved);
        }
        tracing::warn!(spec = %spec, "summary model does not resolve, falling back");
    }
    if let Some(resolved) = state.providers.for_role("summarizer") {
        return Ok(resolved);
    }
    resolve_chat_provider(state, session_model)
}
