//! Turn execution — the per-message control loop.
//!
//! One turn: take the session interlock, append the user message, call the
//! provider, dispatch any tool calls in order, loop until the model answers
//! with text or the chain cap is hit, persist, release.
//!
//! Mutations are buffered on an owned copy of the session and written back
//! in one pass at the end; an error anywhere leaves the persisted session
//! exactly as the turn found it.

use std::time::Instant;

use chrono::Utc;

use trellis_domain::error::{Error, Result};
use trellis_domain::{ChatMessage, RequestContext, ToolCall, Usage};
use trellis_providers::ChatRequest;
use trellis_sessions::{MessageRecord, Session, ToolCallRecord};
use trellis_tools::ToolRegistry;

use crate::cancel::CancelToken;
use crate::state::RuntimeState;
use crate::{build_catalog, build_system_prompt, resolve_chat_provider};

/// Maximum provider calls per turn before the chain is cut off.
pub const MAX_TOOL_LOOPS: usize = 8;

/// What a successful turn hands back to the caller.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub usage: Usage,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// process_message — the engine entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn for `session_id`, creating the session (anchored at the
/// knowledge root) if it does not exist yet.
///
/// Fails with [`Error::Busy`] when another turn or a summarization holds
/// the session's interlock. The interlock is released on every exit path.
pub async fn process_message(
    state: &RuntimeState,
    ctx: &RequestContext,
    session_id: &str,
    user_text: &str,
) -> Result<TurnOutcome> {
    if state.store.get_session(session_id).await?.is_none() {
        // Upsert preserves an existing row, so a racing create is benign;
        // the CAS below picks exactly one winner.
        state
            .store
            .upsert_session(Session::new(session_id, &ctx.user_id))
            .await?;
    }

    if !state.store.try_begin(session_id).await? {
        return Err(Error::Busy(session_id.to_owned()));
    }
    let cancel = state.cancel_map.register(session_id);

    let result = run_turn(state, ctx, session_id, user_text, &cancel).await;

    state.cancel_map.remove(session_id);
    if let Err(e) = state.store.end(session_id).await {
        tracing::warn!(session_id, error = %e, "failed to release session interlock");
    }

    if let Err(e) = &result {
        tracing::debug!(session_id, error = %e, "turn failed");
    }
    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn internals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Buffered state for one turn: the owned session copy plus the audit
/// records to append if the turn commits.
struct TurnBuffer {
    session: Session,
    messages: Vec<MessageRecord>,
    tool_calls: Vec<ToolCallRecord>,
}

impl TurnBuffer {
    fn push_message(&mut self, msg: ChatMessage) {
        self.messages.push(MessageRecord {
            session_id: self.session.session_id.clone(),
            user_id: self.session.user_id.clone(),
            seq_id: msg.seq_id,
            role: msg.role,
            content: msg.content.clone(),
            created_at: msg.created_at,
        });
        self.session.msgs.push(msg);
    }
}

async fn run_turn(
    state: &RuntimeState,
    ctx: &RequestContext,
    session_id: &str,
    user_text: &str,
    cancel: &CancelToken,
) -> Result<TurnOutcome> {
    // Reload under the interlock — ours now.
    let session = state
        .store
        .get_session(session_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;

    let mut buf = TurnBuffer {
        session,
        messages: Vec::new(),
        tool_calls: Vec::new(),
    };

    // A fresh session is anchored at its node with a system prompt.
    if buf.session.msgs.is_empty() {
        let node = state.repository.load_node(&buf.session.node_path).await?;
        let seq = buf.session.next_message_seq();
        buf.push_message(ChatMessage::system(seq, build_system_prompt(&node)));
    }

    let seq = buf.session.next_message_seq();
    buf.push_message(ChatMessage::user(seq, user_text));

    let catalog = build_catalog(state, &buf.session.node_path).await?;
    let tool_defs = catalog.definitions();
    let (provider, model) = resolve_chat_provider(state, buf.session.model.as_deref())?;

    let mut total_usage = Usage::default();

    for loop_idx in 0..MAX_TOOL_LOOPS {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(session_id.to_owned()));
        }
        tracing::debug!(session_id, loop_idx, "tool loop iteration");

        let req = ChatRequest {
            messages: buf.session.msgs.clone(),
            tools: tool_defs.clone(),
            model: model.clone(),
            temperature: Some(0.2),
            ..Default::default()
        };
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled(session_id.to_owned())),
            result = provider.chat(ctx, req) => result?,
        };
        total_usage.add(&response.usage);

        // Text-only response: the turn is done.
        if response.tool_calls.is_empty() {
            let seq = buf.session.next_message_seq();
            buf.push_message(ChatMessage::assistant(seq, response.content.clone()));
            return commit_turn(
                state,
                buf,
                TurnOutcome {
                    reply: response.content,
                    usage: total_usage,
                },
            )
            .await;
        }

        // Assistant message carrying the calls, then one tool-result
        // message per call, in provider order.
        let seq = buf.session.next_message_seq();
        buf.push_message(ChatMessage::assistant_with_calls(
            seq,
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        for call in &response.tool_calls {
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled(session_id.to_owned())),
                result = execute_tool_call(state, &catalog, call) => result,
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let (result_text, is_error) = match outcome {
                Ok(text) => (text, false),
                // Gate and handler failures become tool-result messages,
                // never fatal to the turn.
                Err(e) => (format!("Error: {e}"), true),
            };

            let tool_id = buf.session.next_tool_seq();
            buf.tool_calls.push(ToolCallRecord {
                session_id: buf.session.session_id.clone(),
                user_id: buf.session.user_id.clone(),
                tool_id,
                call_id: call.call_id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
                result: result_text.clone(),
                is_error,
                duration_ms,
                created_at: Utc::now(),
            });

            let seq = buf.session.next_message_seq();
            buf.push_message(ChatMessage::tool_result(seq, &call.call_id, result_text));
        }
    }

    Err(Error::IterationLimit(MAX_TOOL_LOOPS))
}

/// Gate the call against the path catalog, then dispatch it.
async fn execute_tool_call(
    state: &RuntimeState,
    catalog: &ToolRegistry,
    call: &ToolCall,
) -> Result<String> {
    catalog.check_usable(&call.name)?;

    let args = if call.arguments.trim().is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    call_id = %call.call_id,
                    tool = %call.name,
                    error = %e,
                    "tool call arguments are not valid JSON; defaulting to empty object"
                );
                serde_json::Value::Object(Default::default())
            }
        }
    };

    state.functions.execute(&call.name, args).await
}

/// Persist the buffered turn in one pass and hand back the outcome.
async fn commit_turn(
    state: &RuntimeState,
    buf: TurnBuffer,
    outcome: TurnOutcome,
) -> Result<TurnOutcome> {
    let session_id = buf.session.session_id.clone();
    let window_len = buf.session.msgs.len();

    state.store.upsert_session(buf.session).await?;
    for record in buf.messages {
        state.store.append_message(record).await?;
    }
    for record in buf.tool_calls {
        state.store.append_tool_call(record).await?;
    }

    // Size-driven compaction happens outside the turn; the scheduler's
    // immediate class picks this session up on its next tick.
    if window_len >= state.config.scheduler.immediate_threshold {
        tracing::info!(
            session_id = %session_id,
            window_len,
            "session crossed the immediate summarization threshold"
        );
    }

    Ok(outcome)
}
