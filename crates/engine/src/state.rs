use std::sync::Arc;

use trellis_domain::config::Config;
use trellis_knowledge::NodeRepository;
use trellis_providers::ProviderRegistry;
use trellis_sessions::SessionStore;
use trellis_tools::FunctionRegistry;

use crate::cancel::CancelMap;

/// Shared runtime state passed to the engine, scheduler, and summarizer.
///
/// Every shared object is owned here and created at startup — nothing in
/// trellis reaches for process-global state. Cloning is cheap (all Arcs).
#[derive(Clone)]
pub struct RuntimeState {
    // ── Core services ────────────────────────────────────────────
    pub config: Arc<Config>,
    pub providers: Arc<ProviderRegistry>,

    // ── Knowledge & tools ────────────────────────────────────────
    pub repository: Arc<NodeRepository>,
    pub functions: Arc<FunctionRegistry>,

    // ── Sessions ─────────────────────────────────────────────────
    pub store: Arc<dyn SessionStore>,
    pub cancel_map: Arc<CancelMap>,
}
