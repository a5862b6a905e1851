//! Persisted entities.
//!
//! Sessions carry their full message state (flat `msgs`/`archived_msgs`);
//! the remaining types are append-only audit views of engine events. All
//! structs lean on `#[serde(default)]` so old snapshots keep loading as
//! fields are added.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use trellis_domain::{ChatMessage, Role};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            display_name: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tracked conversation.
///
/// `msgs` is the active window — exactly what the provider sees.
/// `archived_msgs` holds what summarization removed; audit only, never
/// replayed. The `in_progress` flag is the per-session interlock: at most
/// one turn or summarization may hold it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    #[serde(default = "d_root")]
    pub agent_type: String,
    /// Knowledge path the session is anchored at.
    #[serde(default = "d_root")]
    pub node_path: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Model override, `provider_id/model`. `None` = runtime default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub msgs: Vec<ChatMessage>,
    #[serde(default)]
    pub archived_msgs: Vec<ChatMessage>,
    /// Counter minting message `seq_id`s. Never rewound.
    #[serde(default)]
    pub message_seq: u64,
    /// Counter minting tool-call `tool_id`s. Never rewound.
    #[serde(default)]
    pub tool_seq: u64,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub in_progress_since: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub summarized_at: Option<DateTime<Utc>>,
    /// Value of `message_seq` right after the last summarization; the
    /// scheduler derives "messages added since" from it.
    #[serde(default)]
    pub summarized_seq: u64,
}

fn d_root() -> String {
    "root".into()
}

impl Session {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            agent_type: d_root(),
            node_path: d_root(),
            title: String::new(),
            summary: String::new(),
            tags: Vec::new(),
            model: None,
            msgs: Vec::new(),
            archived_msgs: Vec::new(),
            message_seq: 0,
            tool_seq: 0,
            in_progress: false,
            in_progress_since: None,
            created_at: now,
            updated_at: now,
            summarized_at: None,
            summarized_seq: 0,
        }
    }

    pub fn next_message_seq(&mut self) -> u64 {
        self.message_seq += 1;
        self.message_seq
    }

    pub fn next_tool_seq(&mut self) -> u64 {
        self.tool_seq += 1;
        self.tool_seq
    }

    /// The system prompt, when present. Invariant: position 0.
    pub fn system_prompt(&self) -> Option<&ChatMessage> {
        self.msgs.first().filter(|m| m.is_system())
    }

    /// Messages minted since the last summarization.
    pub fn messages_since_summarization(&self) -> u64 {
        self.message_seq.saturating_sub(self.summarized_seq)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audit records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persisted view of one appended chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub session_id: String,
    pub user_id: String,
    pub seq_id: u64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted view of one executed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub session_id: String,
    pub user_id: String,
    pub tool_id: u64,
    pub call_id: String,
    pub tool_name: String,
    /// JSON argument string as received from the provider.
    pub arguments: String,
    pub result: String,
    pub is_error: bool,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// A file surfaced to the conversation by a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenedFileRecord {
    pub session_id: String,
    pub user_id: String,
    pub seq_id: u64,
    pub path: String,
    #[serde(default)]
    pub tool_name: String,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarization log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizationStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizationType {
    First,
    Subsequent,
    Immediate,
}

/// One summarization attempt, recorded before the provider call and
/// completed afterwards. Success and failure are both recoverable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationLog {
    pub log_id: String,
    pub session_id: String,
    pub user_id: String,
    pub session_title: String,
    pub status: SummarizationStatus,
    pub summarization_type: SummarizationType,
    #[serde(default)]
    pub model_used: String,
    #[serde(default)]
    pub requested_model: String,
    #[serde(default)]
    pub prompt_sent: String,
    #[serde(default)]
    pub response_received: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub previous_summary: String,
    #[serde(default)]
    pub generated_summary: String,
    #[serde(default)]
    pub previous_tags: Vec<String>,
    #[serde(default)]
    pub generated_tags: Vec<String>,
    #[serde(default)]
    pub generated_title: Option<String>,
    #[serde(default)]
    pub messages_before_count: usize,
    #[serde(default)]
    pub messages_after_count: usize,
    #[serde(default)]
    pub archived_messages_count: usize,
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(default)]
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SummarizationLog {
    /// A fresh `pending` record for one attempt.
    pub fn pending(
        session: &Session,
        kind: SummarizationType,
        requested_model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            log_id: uuid::Uuid::new_v4().to_string(),
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            session_title: session.title.clone(),
            status: SummarizationStatus::Pending,
            summarization_type: kind,
            model_used: String::new(),
            requested_model: requested_model.into(),
            prompt_sent: prompt.into(),
            response_received: String::new(),
            error_message: String::new(),
            previous_summary: session.summary.clone(),
            generated_summary: String::new(),
            previous_tags: session.tags.clone(),
            generated_tags: Vec::new(),
            generated_title: None,
            messages_before_count: session.msgs.len(),
            messages_after_count: 0,
            archived_messages_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            duration_ms: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
