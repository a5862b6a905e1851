use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// How tools accumulated along a knowledge path merge on name collision.
    #[serde(default)]
    pub tool_strategy: ToolMergeStrategy,
}

impl Config {
    /// Parse a TOML document. Unknown keys are ignored so configs can carry
    /// sections for external collaborators (HTTP frontends etc.).
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a TOML file on disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        Self::from_toml_str(&raw)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool merge strategy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolution for same-name tools contributed by different nodes on the
/// root → current path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMergeStrategy {
    /// A deeper node's tool replaces a shallower one with the same name.
    #[default]
    Override,
    /// Name collisions are rejected; names stay unique across the path.
    Append,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Knowledge tree
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Directory holding the tree; must contain a `root/` node.
    #[serde(default = "d_knowledge_dir")]
    pub root_dir: PathBuf,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            root_dir: d_knowledge_dir(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Role assignments, e.g. `chat = "main/gpt-4o"`,
    /// `summarizer = "main/gpt-4o-mini"`. Values are `provider_id/model`.
    #[serde(default)]
    pub roles: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub base_url: String,
    /// Environment variable holding the API key. Resolved at registry build.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Direct key (discouraged outside tests; env resolution wins).
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    /// Resolve the effective API key: env var first, then the direct key.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(var) = &self.api_key_env {
            match std::env::var(var) {
                Ok(key) if !key.is_empty() => return Ok(key),
                _ => {
                    return Err(Error::Config(format!(
                        "provider {}: env var {var} is unset or empty",
                        self.id
                    )))
                }
            }
        }
        self.api_key.clone().ok_or_else(|| {
            Error::Config(format!("provider {}: no api_key or api_key_env", self.id))
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarization scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Seconds between ticks.
    #[serde(default = "d_30")]
    pub check_interval_secs: u64,
    /// Minimum active-window length for a never-summarized session.
    #[serde(default = "d_5")]
    pub first_threshold: usize,
    /// Minimum messages added since the previous summarization.
    #[serde(default = "d_25")]
    pub subsequent_message_threshold: usize,
    /// Minimum seconds since the previous summarization.
    #[serde(default = "d_3600")]
    pub subsequent_time_threshold_secs: u64,
    /// Only sessions updated within this window are considered.
    #[serde(default = "d_3600")]
    pub last_activity_threshold_secs: u64,
    /// Active-window length that forces summarization unconditionally.
    #[serde(default = "d_50")]
    pub immediate_threshold: usize,
    /// Model for the summarizer, `provider_id/model`. Falls back to the
    /// session's own model when unset.
    #[serde(default)]
    pub summary_model: Option<String>,
    /// Suppress per-tick scheduler logging.
    #[serde(default)]
    pub disable_logs: bool,
    /// Upper bound on summarizations started per tick.
    #[serde(default)]
    pub max_sessions_per_tick: Option<usize>,
    /// Recent messages that survive a history rewrite.
    #[serde(default = "d_4")]
    pub keep_tail: usize,
    /// Interlocks older than this are cleared by the startup sweep.
    #[serde(default = "d_300")]
    pub stale_lock_max_age_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 30,
            first_threshold: 5,
            subsequent_message_threshold: 25,
            subsequent_time_threshold_secs: 3600,
            last_activity_threshold_secs: 3600,
            immediate_threshold: 50,
            summary_model: None,
            disable_logs: false,
            max_sessions_per_tick: None,
            keep_tail: 4,
            stale_lock_max_age_secs: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn subsequent_time_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.subsequent_time_threshold_secs as i64)
    }

    pub fn last_activity_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.last_activity_threshold_secs as i64)
    }

    pub fn stale_lock_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_lock_max_age_secs as i64)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// JSON snapshot file. `None` keeps the store purely in memory.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

// ── Serde default helpers ──────────────────────────────────────────

fn d_knowledge_dir() -> PathBuf {
    PathBuf::from("./knowledge")
}
fn d_true() -> bool {
    true
}
fn d_4() -> usize {
    4
}
fn d_5() -> usize {
    5
}
fn d_25() -> usize {
    25
}
fn d_50() -> usize {
    50
}
fn d_30() -> u64 {
    30
}
fn d_300() -> u64 {
    300
}
fn d_3600() -> u64 {
    3600
}
fn d_timeout_secs() -> u64 {
    120
}
