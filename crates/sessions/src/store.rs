//! The store capability trait.
//!
//! Every component that touches persisted state depends on this interface,
//! never on a concrete store. The store is the serialization point: it must
//! give read-your-writes within a single session and make `try_begin` a
//! true compare-and-set so the `in_progress` interlock holds across
//! concurrent turns and summarizations.

use chrono::{DateTime, Duration, Utc};

use trellis_domain::{ChatMessage, Result};

use crate::entities::{
    MessageRecord, OpenedFileRecord, Session, SummarizationLog, ToolCallRecord, User,
};

/// Atomic history rewrite applied by the summarizer.
#[derive(Debug, Clone)]
pub struct SessionRewrite {
    pub msgs: Vec<ChatMessage>,
    pub archived_msgs: Vec<ChatMessage>,
    pub summary: String,
    pub tags: Option<Vec<String>>,
    /// Set only on first summarization.
    pub title: Option<String>,
    pub summarized_at: DateTime<Utc>,
    /// `message_seq` at rewrite time, recorded for the subsequent-threshold.
    pub summarized_seq: u64,
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    // ── Users ─────────────────────────────────────────────────────
    async fn put_user(&self, user: User) -> Result<()>;
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;
    /// All users, newest first.
    async fn list_users(&self) -> Result<Vec<User>>;
    /// Remove a user and every record belonging to them.
    async fn delete_user_data(&self, user_id: &str) -> Result<()>;

    // ── Sessions ──────────────────────────────────────────────────
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;
    /// Insert or replace. An existing session keeps its `created_at`;
    /// `updated_at` is bumped.
    async fn upsert_session(&self, session: Session) -> Result<()>;
    /// Sessions for one user, newest first.
    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>>;
    /// Sessions whose `updated_at` is at or after `since`, newest first.
    async fn sessions_active_since(&self, since: DateTime<Utc>) -> Result<Vec<Session>>;

    // ── Interlock ─────────────────────────────────────────────────
    /// Compare-and-set `in_progress` false → true. `Ok(false)` when the
    /// interlock is already held.
    async fn try_begin(&self, session_id: &str) -> Result<bool>;
    /// Release the interlock. Idempotent.
    async fn end(&self, session_id: &str) -> Result<()>;
    /// Clear interlocks older than `max_age` (crash recovery at startup).
    /// Returns how many were cleared.
    async fn sweep_stale_locks(&self, max_age: Duration) -> Result<usize>;

    // ── History rewrite ───────────────────────────────────────────
    /// Atomically swap a session's message windows and summary fields.
    async fn replace_session_messages(
        &self,
        session_id: &str,
        rewrite: SessionRewrite,
    ) -> Result<()>;

    // ── Appends ───────────────────────────────────────────────────
    async fn append_message(&self, record: MessageRecord) -> Result<()>;
    async fn append_tool_call(&self, record: ToolCallRecord) -> Result<()>;
    async fn append_opened_file(&self, record: OpenedFileRecord) -> Result<()>;
    async fn append_summarization_log(&self, log: SummarizationLog) -> Result<()>;
    /// Replace a previously appended log (matched on `log_id`).
    async fn update_summarization_log(&self, log: SummarizationLog) -> Result<()>;

    // ── Filtered reads ────────────────────────────────────────────
    /// One session's message records in conversation order (ascending seq).
    async fn messages_for_session(&self, session_id: &str) -> Result<Vec<MessageRecord>>;
    /// One user's message records, newest first.
    async fn messages_for_user(&self, user_id: &str) -> Result<Vec<MessageRecord>>;
    async fn tool_calls_for_session(&self, session_id: &str) -> Result<Vec<ToolCallRecord>>;
    async fn tool_calls_all(&self) -> Result<Vec<ToolCallRecord>>;
    async fn opened_files_for_session(&self, session_id: &str) -> Result<Vec<OpenedFileRecord>>;
    async fn opened_files_for_user(&self, user_id: &str) -> Result<Vec<OpenedFileRecord>>;
    async fn summarization_logs_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<SummarizationLog>>;
    async fn summarization_logs_all(&self) -> Result<Vec<SummarizationLog>>;
}
