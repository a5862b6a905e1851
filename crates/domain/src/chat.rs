use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    /// JSON-encoded argument string, exactly as the provider returned it.
    pub arguments: String,
}

/// Tool definition exposed to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// One message of a session's history.
///
/// Doubles as the persisted record and the unit the provider request is
/// assembled from. `seq_id` is minted from the session's message counter and
/// totally orders messages within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub seq_id: u64,
    pub role: Role,
    pub content: String,
    /// Tool invocations attached to an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Link back to the originating call for a tool-result message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatMessage {
    fn base(seq_id: u64, role: Role, content: impl Into<String>) -> Self {
        Self {
            seq_id,
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn system(seq_id: u64, text: impl Into<String>) -> Self {
        Self::base(seq_id, Role::System, text)
    }

    pub fn user(seq_id: u64, text: impl Into<String>) -> Self {
        Self::base(seq_id, Role::User, text)
    }

    pub fn assistant(seq_id: u64, text: impl Into<String>) -> Self {
        Self::base(seq_id, Role::Assistant, text)
    }

    pub fn assistant_with_calls(
        seq_id: u64,
        text: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let mut msg = Self::base(seq_id, Role::Assistant, text);
        msg.tool_calls = tool_calls;
        msg
    }

    pub fn tool_result(
        seq_id: u64,
        call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::base(seq_id, Role::Tool, content);
        msg.tool_call_id = Some(call_id.into());
        msg
    }

    /// Whether this is a system-prompt message (position 0 by invariant).
    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Accumulate another usage sample (tool loops add up per turn).
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}
