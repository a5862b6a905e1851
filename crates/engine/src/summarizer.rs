//! History summarization — compacts a session's active window.
//!
//! Every attempt is recorded: a `pending` log goes in before the provider
//! call, and is completed as `success` or `failed` afterwards. Only a
//! successful attempt rewrites the session, atomically, through
//! `replace_session_messages`. The caller must hold the session interlock.

use std::time::Instant;

use chrono::Utc;
use serde::Deserialize;

use trellis_domain::error::{Error, Result};
use trellis_domain::{ChatMessage, RequestContext, Role};
use trellis_providers::{ChatRequest, ChatResponse};
use trellis_sessions::{
    SessionRewrite, SummarizationLog, SummarizationStatus, SummarizationType,
};

use crate::resolve_summary_provider;
use crate::state::RuntimeState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// summarize_session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Summarize one session's history. Interlock must be held by the caller.
///
/// On success the active window shrinks to `[system?] ++ kept tail`, the
/// removed messages move to the archive, and summary/tags (and title, on
/// the first pass) are updated. On failure the session is untouched and
/// the log records the attempt.
pub async fn summarize_session(
    state: &RuntimeState,
    session_id: &str,
    kind: SummarizationType,
) -> Result<()> {
    let session = state
        .store
        .get_session(session_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;

    let keep_tail = state.config.scheduler.keep_tail;
    let (removed, kept) = split_window(&session.msgs, keep_tail);
    if removed.is_empty() {
        tracing::debug!(session_id, "nothing to summarize, window within tail");
        return Ok(());
    }

    let (provider, model) = resolve_summary_provider(state, session.model.as_deref())?;
    let requested_model = state
        .config
        .scheduler
        .summary_model
        .clone()
        .or_else(|| session.model.clone())
        .unwrap_or_default();

    let prompt = build_summary_prompt(&session.summary, &removed, kind);
    let mut log = SummarizationLog::pending(&session, kind, requested_model, &prompt);
    state.store.append_summarization_log(log.clone()).await?;

    let started = Instant::now();
    let ctx = RequestContext::for_session(&session.user_id, &session.session_id);
    let req = ChatRequest {
        messages: vec![ChatMessage::user(1, prompt)],
        model,
        temperature: Some(0.1),
        max_tokens: Some(2000),
        json_mode: true,
        ..Default::default()
    };

    let attempt = match provider.chat(&ctx, req).await {
        Ok(resp) => parse_summary_output(&resp).map(|out| (resp, out)),
        Err(e) => Err(e),
    };
    log.duration_ms = started.elapsed().as_millis() as u64;
    log.completed_at = Some(Utc::now());

    match attempt {
        Ok((resp, out)) => {
            let mut msgs = Vec::new();
            if let Some(system) = session.system_prompt() {
                msgs.push(system.clone());
            }
            msgs.extend(kept);

            let mut archived = session.archived_msgs.clone();
            archived.extend(removed.iter().cloned());

            let title = match kind {
                SummarizationType::First => out.title.clone(),
                _ => None,
            };

            log.status = SummarizationStatus::Success;
            log.model_used = resp.model.clone();
            log.response_received = resp.content.clone();
            log.generated_summary = out.summary.clone();
            log.generated_tags = out.tags.clone().unwrap_or_default();
            log.generated_title = title.clone();
            log.messages_after_count = msgs.len();
            log.archived_messages_count = removed.len();
            log.prompt_tokens = resp.usage.prompt_tokens;
            log.completion_tokens = resp.usage.completion_tokens;
            log.total_tokens = resp.usage.total_tokens;

            state
                .store
                .replace_session_messages(
                    session_id,
                    SessionRewrite {
                        msgs,
                        archived_msgs: archived,
                        summary: out.summary,
                        tags: out.tags,
                        title,
                        summarized_at: Utc::now(),
                        summarized_seq: session.message_seq,
                    },
                )
                .await?;
            state.store.update_summarization_log(log).await?;

            tracing::info!(
                session_id,
                kind = ?kind,
                archived = removed.len(),
                "session history summarized"
            );
            Ok(())
        }
        Err(e) => {
            log.status = SummarizationStatus::Failed;
            log.error_message = e.to_string();
            state.store.update_summarization_log(log).await?;
            Err(e)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Window split & prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split the active window into `(removed, kept)` around the keep-tail.
/// A system prompt at position 0 belongs to neither — it is re-anchored
/// by the rewrite.
pub(crate) fn split_window(
    msgs: &[ChatMessage],
    keep_tail: usize,
) -> (Vec<ChatMessage>, Vec<ChatMessage>) {
    let start = if msgs.first().map_or(false, |m| m.is_system()) {
        1
    } else {
        0
    };
    let body = &msgs[start..];
    let keep_from = body.len().saturating_sub(keep_tail);
    (body[..keep_from].to_vec(), body[keep_from..].to_vec())
}

/// Render the summarization prompt: instructions, the running summary, and
/// the messages about to be archived.
pub(crate) fn build_summary_prompt(
    previous_summary: &str,
    removed: &[ChatMessage],
    kind: SummarizationType,
) -> String {
    let mut prompt = String::from(
        "You are a conversation summarizer. Fold the conversation below \
         into the running summary, preserving:\n\
         1. The current goal or task being worked on\n\
         2. Key decisions and their outcomes\n\
         3. Open questions or unfinished threads\n\
         4. Important facts learned about the user\n\n\
         Respond with a JSON object: {\"summary\": \"...\", \
         \"tags\": [\"...\"]",
    );
    if kind == SummarizationType::First {
        prompt.push_str(", \"title\": \"...\"");
    }
    prompt.push_str("}.\n\n");

    if !previous_summary.is_empty() {
        prompt.push_str("RUNNING SUMMARY:\n");
        prompt.push_str(previous_summary);
        prompt.push_str("\n\n");
    }

    prompt.push_str("CONVERSATION:\n");
    for msg in removed {
        prompt.push_str(role_label(msg.role));
        prompt.push_str(": ");
        // Very long entries (tool results) are clipped to keep the prompt
        // bounded.
        if msg.content.len() > 2000 {
            let head = floor_char_boundary(&msg.content, 1000);
            let tail = ceil_char_boundary(&msg.content, msg.content.len() - 500);
            prompt.push_str(&msg.content[..head]);
            prompt.push_str(" [...] ");
            prompt.push_str(&msg.content[tail..]);
        } else {
            prompt.push_str(&msg.content);
        }
        prompt.push('\n');
    }
    prompt
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
        Role::Tool => "Tool",
        Role::System => "System",
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structured output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub(crate) struct SummaryOutput {
    pub summary: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub title: Option<String>,
}

pub(crate) fn parse_summary_output(resp: &ChatResponse) -> Result<SummaryOutput> {
    let out: SummaryOutput = serde_json::from_str(resp.content.trim())
        .map_err(|e| Error::Parse(format!("summarizer output: {e}")))?;
    if out.summary.trim().is_empty() {
        return Err(Error::Parse("summarizer returned an empty summary".into()));
    }
    Ok(out)
}
