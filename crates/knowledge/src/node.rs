//! Node records and their on-disk schema.
//!
//! Layout per node directory:
//!
//! ```text
//! <path>/
//!   node.yaml    # metadata; required key: id
//!   node.md      # prose content (optional)
//!   tools.json   # tool catalog (optional)
//!   <child>/     # subdirectories become child nodes
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use trellis_domain::ToolSpec;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One loaded knowledge node. Immutable after load except for the summary,
/// which the repository may backfill.
#[derive(Debug, Clone)]
pub struct Node {
    /// Tree key, e.g. `"root/billing/refunds"`.
    pub path: String,
    pub id: String,
    pub title: String,
    pub description: String,
    /// Prose content from `node.md`. Empty when the file is absent.
    pub content: String,
    pub summary: String,
    pub tools: Vec<ToolSpec>,
    /// Permission map from metadata, passed through verbatim.
    pub auth: BTreeMap<String, String>,
    /// Hex SHA-256 digest of `content`.
    pub hash: String,
    pub loaded_at: DateTime<Utc>,
}

impl Node {
    /// The parent tree key, or `None` for the root node.
    pub fn parent_path(&self) -> Option<&str> {
        self.path.rsplit_once('/').map(|(parent, _)| parent)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// On-disk schemas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `node.yaml` metadata. Unknown keys (e.g. `mcp`) are tolerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMeta {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub auth: BTreeMap<String, String>,
}

/// `tools.json` catalog wrapper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCatalog {
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}
