//! Summary generation seam.
//!
//! The repository does not know how summaries are produced — a generator is
//! injected at construction. The provider-backed implementation lives in
//! `trellis-providers`; tests inject scripted ones.

use trellis_domain::Result;

/// Produces a short summary for a node's prose content.
#[async_trait::async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn summarize(&self, title: &str, content: &str) -> Result<String>;
}
