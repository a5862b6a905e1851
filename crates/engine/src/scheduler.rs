//! Session scheduler — the background worker that finds histories due for
//! summarization and runs them through the summarizer.
//!
//! A single loop ticks on `check_interval`. Each tick classifies recently
//! active sessions (immediate > first > subsequent), takes each eligible
//! session's interlock, and summarizes. Busy sessions are skipped and
//! retried next tick; individual failures never abort the loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use trellis_domain::SchedulerConfig;
use trellis_sessions::{Session, SummarizationType};

use crate::state::RuntimeState;
use crate::summarizer;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decide whether (and how) a session should be summarized right now.
///
/// Immediate wins over everything: a window at or past the hard cap is
/// compacted regardless of the other conditions.
pub fn classify(
    session: &Session,
    cfg: &SchedulerConfig,
    now: DateTime<Utc>,
) -> Option<SummarizationType> {
    if session.msgs.len() >= cfg.immediate_threshold {
        return Some(SummarizationType::Immediate);
    }

    match session.summarized_at {
        None => {
            (session.msgs.len() >= cfg.first_threshold).then_some(SummarizationType::First)
        }
        Some(at) => {
            let added = session.messages_since_summarization() as usize;
            let waited = now.signed_duration_since(at) >= cfg.subsequent_time_threshold();
            (added >= cfg.subsequent_message_threshold && waited)
                .then_some(SummarizationType::Subsequent)
        }
    }
}

fn class_rank(kind: SummarizationType) -> u8 {
    match kind {
        SummarizationType::Immediate => 0,
        SummarizationType::First => 1,
        SummarizationType::Subsequent => 2,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tick
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One scheduler pass. Public so embedders and tests can drive ticks
/// without the background loop.
pub async fn tick(state: &RuntimeState) {
    let cfg = &state.config.scheduler;
    let now = Utc::now();
    let since = now - cfg.last_activity_threshold();

    let sessions = match state.store.sessions_active_since(since).await {
        Ok(sessions) => sessions,
        Err(e) => {
            tracing::warn!(error = %e, "scheduler could not list sessions");
            return;
        }
    };

    let mut eligible: Vec<(Session, SummarizationType)> = sessions
        .into_iter()
        .filter_map(|s| classify(&s, cfg, now).map(|kind| (s, kind)))
        .collect();

    // Class priority first, newest activity first within a class.
    eligible.sort_by_key(|(s, kind)| (class_rank(*kind), std::cmp::Reverse(s.updated_at)));
    if let Some(max) = cfg.max_sessions_per_tick {
        eligible.truncate(max);
    }

    if eligible.is_empty() {
        return;
    }
    if !cfg.disable_logs {
        tracing::info!(eligible = eligible.len(), "scheduler tick");
    }

    for (session, kind) in eligible {
        let session_id = session.session_id.as_str();

        match state.store.try_begin(session_id).await {
            Ok(true) => {}
            Ok(false) => {
                // A turn owns the session; retry on a later tick.
                if !cfg.disable_logs {
                    tracing::debug!(session_id, "session busy, skipping");
                }
                continue;
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "interlock acquisition failed");
                continue;
            }
        }

        let result = summarizer::summarize_session(state, session_id, kind).await;
        if let Err(e) = &result {
            if !cfg.disable_logs {
                tracing::warn!(session_id, kind = ?kind, error = %e, "summarization failed");
            }
        }

        if let Err(e) = state.store.end(session_id).await {
            tracing::warn!(session_id, error = %e, "failed to release interlock");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle to the running scheduler loop.
pub struct SchedulerHandle {
    handle: tokio::task::JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl SchedulerHandle {
    /// Stop the loop. An in-flight tick finishes first.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

/// Spawn the background worker. Callers should not spawn when the
/// scheduler is disabled in config.
pub fn spawn(state: RuntimeState) -> SchedulerHandle {
    let shutdown = Arc::new(Notify::new());
    let notify = shutdown.clone();

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.scheduler.check_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; swallow it so the
        // runtime settles before the first pass.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = notify.notified() => break,
                _ = interval.tick() => tick(&state).await,
            }
        }
        tracing::debug!("scheduler loop stopped");
    });

    SchedulerHandle { handle, shutdown }
}
