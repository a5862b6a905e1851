/// Shared error type used across all trellis crates.
///
/// Every failure mode the runtime can surface is a tagged variant here, so
/// callers match on kinds instead of downcasting. The engine contract
/// returns these as values — interlock release never depends on unwinding.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("parse: {0}")]
    Parse(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    /// The session interlock is held by another turn or summarization.
    #[error("session {0} is busy — a turn is already in progress")]
    Busy(String),

    #[error("tool {name} is disabled: {reason}")]
    ToolDisabled { name: String, reason: String },

    #[error("tool {0} is hidden")]
    ToolHidden(String),

    #[error("unknown tool: {0}")]
    ToolUnknown(String),

    /// A registered handler returned an error. Surfaced as a tool-result
    /// message during a turn, never fatal to it.
    #[error("tool {name} failed: {message}")]
    ToolExecution { name: String, message: String },

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("tool loop limit reached ({0} iterations)")]
    IterationLimit(usize),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("config: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(format!("JSON: {e}"))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Parse(format!("YAML: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
