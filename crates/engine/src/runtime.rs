//! Runtime wiring.
//!
//! [`Runtime::start`] builds every shared component from config, recovers
//! stale interlocks left by a crashed process, and starts the scheduler.
//! All shared objects live in the returned value; there are no globals.

use std::sync::Arc;

use trellis_domain::config::Config;
use trellis_domain::{RequestContext, Result};
use trellis_knowledge::{NodeRepository, SummaryGenerator};
use trellis_providers::{ProviderRegistry, ProviderSummaryGenerator};
use trellis_sessions::{MemoryStore, SessionStore};
use trellis_tools::FunctionRegistry;

use crate::cancel::CancelMap;
use crate::scheduler::{self, SchedulerHandle};
use crate::state::RuntimeState;
use crate::turn::{self, TurnOutcome};

pub struct Runtime {
    state: RuntimeState,
    scheduler: Option<SchedulerHandle>,
    /// Concrete handle kept for the shutdown flush.
    snapshot_store: Option<Arc<MemoryStore>>,
}

impl Runtime {
    /// Build and start a runtime: providers, knowledge repository, session
    /// store, stale-lock sweep, and (unless disabled) the scheduler loop.
    ///
    /// The function registry is passed in because handlers are the
    /// embedder's code; register them before calling.
    pub async fn start(config: Config, functions: Arc<FunctionRegistry>) -> Result<Self> {
        let config = Arc::new(config);
        let providers = Arc::new(ProviderRegistry::from_config(&config.llm)?);

        // Node summaries use the summarizer stack when one resolves.
        let generator: Option<Arc<dyn SummaryGenerator>> = config
            .scheduler
            .summary_model
            .as_ref()
            .and_then(|spec| providers.resolve_spec(spec))
            .or_else(|| providers.for_role("summarizer"))
            .or_else(|| providers.for_role("chat"))
            .or_else(|| providers.any().map(|p| (p, None)))
            .map(|(provider, model)| {
                Arc::new(ProviderSummaryGenerator::new(provider, model))
                    as Arc<dyn SummaryGenerator>
            });

        let repository = Arc::new(NodeRepository::open(
            &config.knowledge.root_dir,
            generator,
        )?);

        let (store, snapshot_store): (Arc<dyn SessionStore>, Option<Arc<MemoryStore>>) =
            match &config.store.snapshot_path {
                Some(path) => {
                    let store = Arc::new(MemoryStore::with_snapshot(path)?);
                    (store.clone(), Some(store))
                }
                None => (Arc::new(MemoryStore::new()), None),
            };

        let state = RuntimeState {
            config: config.clone(),
            providers,
            repository,
            functions,
            store,
            cancel_map: Arc::new(CancelMap::new()),
        };

        // A crash mid-turn leaves in_progress=true behind; clear anything
        // older than the configured bound before serving traffic.
        let cleared = state
            .store
            .sweep_stale_locks(config.scheduler.stale_lock_max_age())
            .await?;
        if cleared > 0 {
            tracing::info!(cleared, "recovered stale session interlocks at startup");
        }

        let scheduler = config
            .scheduler
            .enabled
            .then(|| scheduler::spawn(state.clone()));

        Ok(Self {
            state,
            scheduler,
            snapshot_store,
        })
    }

    /// Wrap an externally assembled state. No background work is started;
    /// drive [`scheduler::tick`] manually if needed.
    pub fn with_state(state: RuntimeState) -> Self {
        Self {
            state,
            scheduler: None,
            snapshot_store: None,
        }
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    /// Run one conversation turn. See [`turn::process_message`].
    pub async fn process_message(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        user_text: &str,
    ) -> Result<TurnOutcome> {
        turn::process_message(&self.state, ctx, session_id, user_text).await
    }

    /// Cancel a running turn. Returns false when none is in flight.
    pub fn cancel_turn(&self, session_id: &str) -> bool {
        self.state.cancel_map.cancel(session_id)
    }

    /// Backfill knowledge-node summaries. See
    /// [`NodeRepository::ensure_summaries`].
    pub async fn ensure_summaries(&self, force: bool) -> Result<usize> {
        self.state.repository.ensure_summaries(force).await
    }

    /// Stop background work and flush the store snapshot.
    pub async fn shutdown(self) -> Result<()> {
        if let Some(scheduler) = self.scheduler {
            scheduler.shutdown().await;
        }
        if let Some(store) = &self.snapshot_store {
            store.flush()?;
        }
        Ok(())
    }
}
