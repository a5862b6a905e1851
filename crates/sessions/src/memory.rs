//! In-memory store with an optional JSON snapshot.
//!
//! All state sits behind one `parking_lot::RwLock`, which makes every
//! operation — including the `try_begin` compare-and-set and the
//! summarizer's history rewrite — linearizable. The snapshot file is
//! loaded at construction and written on `flush()`; it is a convenience
//! for restarts, not a write-ahead log.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use trellis_domain::error::{Error, Result};

use crate::entities::{
    MessageRecord, OpenedFileRecord, Session, SummarizationLog, ToolCallRecord, User,
};
use crate::store::{SessionRewrite, SessionStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store data
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    users: HashMap<String, User>,
    #[serde(default)]
    sessions: HashMap<String, Session>,
    #[serde(default)]
    messages: Vec<MessageRecord>,
    #[serde(default)]
    tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    opened_files: Vec<OpenedFileRecord>,
    #[serde(default)]
    summarization_logs: Vec<SummarizationLog>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MemoryStore {
    data: RwLock<StoreData>,
    snapshot_path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A purely in-memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            snapshot_path: None,
        }
    }

    /// A store backed by a JSON snapshot file, loaded now if present.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw)?
        } else {
            StoreData::default()
        };

        tracing::info!(
            path = %path.display(),
            sessions = data.sessions.len(),
            "session store loaded"
        );

        Ok(Self {
            data: RwLock::new(data),
            snapshot_path: Some(path),
        })
    }

    /// Persist the current state to the snapshot file, if one is set.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let json = {
            let data = self.data.read();
            serde_json::to_string_pretty(&*data)?
        };
        std::fs::write(path, json).map_err(Error::Io)?;
        Ok(())
    }
}

fn newest_first<T>(mut items: Vec<T>, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
    items
}

#[async_trait::async_trait]
impl SessionStore for MemoryStore {
    // ── Users ─────────────────────────────────────────────────────

    async fn put_user(&self, mut user: User) -> Result<()> {
        let mut data = self.data.write();
        if let Some(existing) = data.users.get(&user.user_id) {
            user.created_at = existing.created_at;
        }
        user.updated_at = Utc::now();
        data.users.insert(user.user_id.clone(), user);
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.data.read().users.get(user_id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let users: Vec<User> = self.data.read().users.values().cloned().collect();
        Ok(newest_first(users, |u| u.created_at))
    }

    async fn delete_user_data(&self, user_id: &str) -> Result<()> {
        let mut data = self.data.write();
        data.users.remove(user_id);
        data.sessions.retain(|_, s| s.user_id != user_id);
        data.messages.retain(|m| m.user_id != user_id);
        data.tool_calls.retain(|t| t.user_id != user_id);
        data.opened_files.retain(|f| f.user_id != user_id);
        data.summarization_logs.retain(|l| l.user_id != user_id);
        tracing::info!(user_id, "deleted all user data");
        Ok(())
    }

    // ── Sessions ──────────────────────────────────────────────────

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.data.read().sessions.get(session_id).cloned())
    }

    async fn upsert_session(&self, mut session: Session) -> Result<()> {
        let mut data = self.data.write();
        if let Some(existing) = data.sessions.get(&session.session_id) {
            session.created_at = existing.created_at;
        }
        session.updated_at = Utc::now();
        data.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let sessions: Vec<Session> = self
            .data
            .read()
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(sessions, |s| s.created_at))
    }

    async fn sessions_active_since(&self, since: DateTime<Utc>) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .data
            .read()
            .sessions
            .values()
            .filter(|s| s.updated_at >= since)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.updated_at));
        Ok(sessions)
    }

    // ── Interlock ─────────────────────────────────────────────────

    async fn try_begin(&self, session_id: &str) -> Result<bool> {
        let mut data = self.data.write();
        let session = data
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        if session.in_progress {
            return Ok(false);
        }
        session.in_progress = true;
        session.in_progress_since = Some(Utc::now());
        Ok(true)
    }

    async fn end(&self, session_id: &str) -> Result<()> {
        let mut data = self.data.write();
        if let Some(session) = data.sessions.get_mut(session_id) {
            session.in_progress = false;
            session.in_progress_since = None;
        }
        Ok(())
    }

    async fn sweep_stale_locks(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let mut cleared = 0;
        let mut data = self.data.write();
        for session in data.sessions.values_mut() {
            if session.in_progress && session.in_progress_since.map_or(true, |t| t < cutoff) {
                session.in_progress = false;
                session.in_progress_since = None;
                cleared += 1;
            }
        }
        if cleared > 0 {
            tracing::warn!(cleared, "cleared stale session interlocks");
        }
        Ok(cleared)
    }

    // ── History rewrite ───────────────────────────────────────────

    async fn replace_session_messages(
        &self,
        session_id: &str,
        rewrite: SessionRewrite,
    ) -> Result<()> {
        let mut data = self.data.write();
        let session = data
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;

        session.msgs = rewrite.msgs;
        session.archived_msgs = rewrite.archived_msgs;
        session.summary = rewrite.summary;
        if let Some(tags) = rewrite.tags {
            session.tags = tags;
        }
        if let Some(title) = rewrite.title {
            session.title = title;
        }
        session.summarized_at = Some(rewrite.summarized_at);
        session.summarized_seq = rewrite.summarized_seq;
        session.updated_at = Utc::now();
        Ok(())
    }

    // ── Appends ───────────────────────────────────────────────────

    async fn append_message(&self, record: MessageRecord) -> Result<()> {
        self.data.write().messages.push(record);
        Ok(())
    }

    async fn append_tool_call(&self, record: ToolCallRecord) -> Result<()> {
        self.data.write().tool_calls.push(record);
        Ok(())
    }

    async fn append_opened_file(&self, record: OpenedFileRecord) -> Result<()> {
        self.data.write().opened_files.push(record);
        Ok(())
    }

    async fn append_summarization_log(&self, log: SummarizationLog) -> Result<()> {
        self.data.write().summarization_logs.push(log);
        Ok(())
    }

    async fn update_summarization_log(&self, log: SummarizationLog) -> Result<()> {
        let mut data = self.data.write();
        match data
            .summarization_logs
            .iter_mut()
            .find(|l| l.log_id == log.log_id)
        {
            Some(slot) => {
                *slot = log;
                Ok(())
            }
            None => Err(Error::NotFound(format!("summarization log {}", log.log_id))),
        }
    }

    // ── Filtered reads ────────────────────────────────────────────

    async fn messages_for_session(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        let mut records: Vec<MessageRecord> = self
            .data
            .read()
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        records.sort_by_key(|m| m.seq_id);
        Ok(records)
    }

    async fn messages_for_user(&self, user_id: &str) -> Result<Vec<MessageRecord>> {
        let records: Vec<MessageRecord> = self
            .data
            .read()
            .messages
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(records, |m| m.created_at))
    }

    async fn tool_calls_for_session(&self, session_id: &str) -> Result<Vec<ToolCallRecord>> {
        let records: Vec<ToolCallRecord> = self
            .data
            .read()
            .tool_calls
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        Ok(newest_first(records, |t| t.created_at))
    }

    async fn tool_calls_all(&self) -> Result<Vec<ToolCallRecord>> {
        Ok(newest_first(
            self.data.read().tool_calls.clone(),
            |t| t.created_at,
        ))
    }

    async fn opened_files_for_session(&self, session_id: &str) -> Result<Vec<OpenedFileRecord>> {
        let records: Vec<OpenedFileRecord> = self
            .data
            .read()
            .opened_files
            .iter()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .collect();
        Ok(newest_first(records, |f| f.created_at))
    }

    async fn opened_files_for_user(&self, user_id: &str) -> Result<Vec<OpenedFileRecord>> {
        let records: Vec<OpenedFileRecord> = self
            .data
            .read()
            .opened_files
            .iter()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(records, |f| f.created_at))
    }

    async fn summarization_logs_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<SummarizationLog>> {
        let logs: Vec<SummarizationLog> = self
            .data
            .read()
            .summarization_logs
            .iter()
            .filter(|l| l.session_id == session_id)
            .cloned()
            .collect();
        Ok(newest_first(logs, |l| l.created_at))
    }

    async fn summarization_logs_all(&self) -> Result<Vec<SummarizationLog>> {
        Ok(newest_first(
            self.data.read().summarization_logs.clone(),
            |l| l.created_at,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_domain::ChatMessage;

    fn session_with_msgs(id: &str, n: usize) -> Session {
        let mut s = Session::new(id, "u1");
        for i in 0..n {
            let seq = s.next_message_seq();
            s.msgs.push(ChatMessage::user(seq, format!("m{i}")));
        }
        s
    }

    #[tokio::test]
    async fn upsert_preserves_created_at() {
        let store = MemoryStore::new();
        let s = Session::new("s1", "u1");
        let created = s.created_at;
        store.upsert_session(s).await.unwrap();

        let mut again = store.get_session("s1").await.unwrap().unwrap();
        again.title = "renamed".into();
        store.upsert_session(again).await.unwrap();

        let loaded = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.created_at, created);
        assert_eq!(loaded.title, "renamed");
        assert!(loaded.updated_at >= created);
    }

    #[tokio::test]
    async fn interlock_cas_is_exclusive() {
        let store = MemoryStore::new();
        store.upsert_session(Session::new("s1", "u1")).await.unwrap();

        assert!(store.try_begin("s1").await.unwrap());
        assert!(!store.try_begin("s1").await.unwrap());
        store.end("s1").await.unwrap();
        assert!(store.try_begin("s1").await.unwrap());
    }

    #[tokio::test]
    async fn try_begin_unknown_session_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.try_begin("ghost").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn stale_lock_sweep_clears_old_locks_only() {
        let store = MemoryStore::new();
        let mut stale = Session::new("stale", "u1");
        stale.in_progress = true;
        stale.in_progress_since = Some(Utc::now() - Duration::minutes(30));
        store.upsert_session(stale).await.unwrap();

        let mut fresh = Session::new("fresh", "u1");
        fresh.in_progress = true;
        fresh.in_progress_since = Some(Utc::now());
        store.upsert_session(fresh).await.unwrap();

        // Upsert rewrote updated_at, not the interlock fields.
        let cleared = store.sweep_stale_locks(Duration::minutes(5)).await.unwrap();
        assert_eq!(cleared, 1);
        assert!(!store.get_session("stale").await.unwrap().unwrap().in_progress);
        assert!(store.get_session("fresh").await.unwrap().unwrap().in_progress);
    }

    #[tokio::test]
    async fn rewrite_swaps_windows_and_summary_fields() {
        let store = MemoryStore::new();
        let s = session_with_msgs("s1", 6);
        let before = s.msgs.clone();
        store.upsert_session(s).await.unwrap();

        let rewrite = SessionRewrite {
            msgs: before[4..].to_vec(),
            archived_msgs: before[..4].to_vec(),
            summary: "S1".into(),
            tags: Some(vec!["t".into()]),
            title: Some("T1".into()),
            summarized_at: Utc::now(),
            summarized_seq: 6,
        };
        store.replace_session_messages("s1", rewrite).await.unwrap();

        let loaded = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.msgs.len(), 2);
        assert_eq!(loaded.archived_msgs.len(), 4);
        assert_eq!(loaded.summary, "S1");
        assert_eq!(loaded.title, "T1");
        assert_eq!(loaded.summarized_seq, 6);
        assert!(loaded.summarized_at.is_some());
        // Nothing lost across the rewrite.
        let mut rejoined = loaded.archived_msgs.clone();
        rejoined.extend(loaded.msgs.clone());
        let seqs: Vec<u64> = rejoined.iter().map(|m| m.seq_id).collect();
        assert_eq!(seqs, (1..=6).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn messages_for_session_in_conversation_order() {
        let store = MemoryStore::new();
        for seq in [3u64, 1, 2] {
            store
                .append_message(MessageRecord {
                    session_id: "s1".into(),
                    user_id: "u1".into(),
                    seq_id: seq,
                    role: trellis_domain::Role::User,
                    content: format!("m{seq}"),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let records = store.messages_for_session("s1").await.unwrap();
        let seqs: Vec<u64> = records.iter().map(|r| r.seq_id).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn update_summarization_log_replaces_by_id() {
        let store = MemoryStore::new();
        let session = Session::new("s1", "u1");
        let mut log = SummarizationLog::pending(
            &session,
            crate::entities::SummarizationType::First,
            "main/small",
            "P",
        );
        store.append_summarization_log(log.clone()).await.unwrap();

        log.status = crate::entities::SummarizationStatus::Success;
        log.generated_summary = "done".into();
        store.update_summarization_log(log.clone()).await.unwrap();

        let logs = store.summarization_logs_for_session("s1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, crate::entities::SummarizationStatus::Success);

        let mut unknown = log;
        unknown.log_id = "missing".into();
        assert!(store.update_summarization_log(unknown).await.is_err());
    }

    #[tokio::test]
    async fn delete_user_data_removes_everything() {
        let store = MemoryStore::new();
        store.put_user(User::new("u1")).await.unwrap();
        store.put_user(User::new("u2")).await.unwrap();
        store.upsert_session(Session::new("s1", "u1")).await.unwrap();
        store.upsert_session(Session::new("s2", "u2")).await.unwrap();
        store
            .append_message(MessageRecord {
                session_id: "s1".into(),
                user_id: "u1".into(),
                seq_id: 1,
                role: trellis_domain::Role::User,
                content: "hello".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        store.delete_user_data("u1").await.unwrap();

        assert!(store.get_user("u1").await.unwrap().is_none());
        assert!(store.get_session("s1").await.unwrap().is_none());
        assert!(store.messages_for_user("u1").await.unwrap().is_empty());
        // Unrelated user untouched.
        assert!(store.get_session("s2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn opened_files_filtered_by_session_and_user() {
        let store = MemoryStore::new();
        for (session, user, path) in [
            ("s1", "u1", "/srv/a.txt"),
            ("s1", "u1", "/srv/b.txt"),
            ("s2", "u2", "/srv/c.txt"),
        ] {
            store
                .append_opened_file(OpenedFileRecord {
                    session_id: session.into(),
                    user_id: user.into(),
                    seq_id: 1,
                    path: path.into(),
                    tool_name: "read_file".into(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.opened_files_for_session("s1").await.unwrap().len(), 2);
        let for_user = store.opened_files_for_user("u2").await.unwrap();
        assert_eq!(for_user.len(), 1);
        assert_eq!(for_user[0].path, "/srv/c.txt");
    }

    #[tokio::test]
    async fn cross_session_reads_and_user_listing() {
        let store = MemoryStore::new();
        store.put_user(User::new("u1")).await.unwrap();
        store.put_user(User::new("u2")).await.unwrap();

        for (session, seq) in [("s1", 1u64), ("s2", 1)] {
            store
                .append_message(MessageRecord {
                    session_id: session.into(),
                    user_id: "u1".into(),
                    seq_id: seq,
                    role: trellis_domain::Role::User,
                    content: "hello".into(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
            store
                .append_tool_call(ToolCallRecord {
                    session_id: session.into(),
                    user_id: "u1".into(),
                    tool_id: 1,
                    call_id: format!("{session}-c1"),
                    tool_name: "echo".into(),
                    arguments: "{}".into(),
                    result: "ok".into(),
                    is_error: false,
                    duration_ms: 3,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.messages_for_user("u1").await.unwrap().len(), 2);
        assert_eq!(store.tool_calls_all().await.unwrap().len(), 2);
        assert_eq!(store.tool_calls_for_session("s2").await.unwrap().len(), 1);
        assert_eq!(store.list_users().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.json");

        {
            let store = MemoryStore::with_snapshot(&path).unwrap();
            store
                .upsert_session(session_with_msgs("s1", 3))
                .await
                .unwrap();
            store.flush().unwrap();
        }

        let reloaded = MemoryStore::with_snapshot(&path).unwrap();
        let session = reloaded.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.msgs.len(), 3);
        assert_eq!(session.message_seq, 3);
    }

    #[tokio::test]
    async fn active_since_filters_and_orders() {
        let store = MemoryStore::new();
        store.upsert_session(Session::new("a", "u1")).await.unwrap();
        store.upsert_session(Session::new("b", "u1")).await.unwrap();

        let all = store
            .sessions_active_since(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].updated_at >= all[1].updated_at);

        let none = store
            .sessions_active_since(Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
