//! Provider-backed node summary generation.
//!
//! Bridges any [`ChatProvider`] to the knowledge repository's
//! [`SummaryGenerator`] seam, so `ensure_summaries` can run against the
//! same backend that serves conversations.

use std::sync::Arc;

use trellis_domain::{ChatMessage, RequestContext, Result};
use trellis_knowledge::SummaryGenerator;

use crate::traits::{ChatProvider, ChatRequest};

pub struct ProviderSummaryGenerator {
    provider: Arc<dyn ChatProvider>,
    model: Option<String>,
}

impl ProviderSummaryGenerator {
    pub fn new(provider: Arc<dyn ChatProvider>, model: Option<String>) -> Self {
        Self { provider, model }
    }
}

#[async_trait::async_trait]
impl SummaryGenerator for ProviderSummaryGenerator {
    async fn summarize(&self, title: &str, content: &str) -> Result<String> {
        let prompt = format!(
            "Summarize the following knowledge document in two to four \
             sentences. Preserve concrete facts, names, and constraints; \
             omit filler. Answer with the summary only.\n\n\
             TITLE: {title}\n\nDOCUMENT:\n{content}"
        );

        let req = ChatRequest {
            messages: vec![ChatMessage::user(1, prompt)],
            model: self.model.clone(),
            temperature: Some(0.1),
            max_tokens: Some(400),
            ..Default::default()
        };

        let ctx = RequestContext::new("system");
        let resp = self.provider.chat(&ctx, req).await?;
        Ok(resp.content.trim().to_owned())
    }
}
