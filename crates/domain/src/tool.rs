use serde::{Deserialize, Serialize};

use crate::chat::ToolDefinition;

/// Disable-reason sentinel recognized by operators and dashboards.
pub const DISABLE_REASON_MAINTENANCE: &str = "maintenance";

/// Lifecycle status of a catalog tool.
///
/// `Hidden` tools are never emitted to the provider. `TemporaryDisabled`
/// tools stay discoverable but execution requests are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    #[default]
    Active,
    TemporaryDisabled,
    Hidden,
}

/// A tool as declared in a knowledge node's catalog (`tools.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolSpec {
    /// Project into the provider-facing definition.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }

    /// Whether the tool may appear in a provider request at all.
    pub fn is_visible(&self) -> bool {
        self.status != ToolStatus::Hidden
    }

    /// Whether execution requests for this tool may be dispatched.
    pub fn is_executable(&self) -> bool {
        self.status == ToolStatus::Active
    }
}
