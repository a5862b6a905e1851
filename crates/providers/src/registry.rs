//! Provider registry.
//!
//! Constructs and holds all configured provider instances. Initialization
//! failures (usually missing API keys) are recorded and skipped rather than
//! aborting startup, so diagnostics can name the broken provider later.

use std::collections::HashMap;
use std::sync::Arc;

use trellis_domain::config::LlmConfig;
use trellis_domain::error::Result;

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::ChatProvider;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    /// role name → `provider_id/model` spec.
    roles: HashMap<String, String>,
    init_errors: Vec<ProviderInitError>,
}

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    /// Error message with potential secrets redacted.
    pub error: String,
}

/// Minimum length of a key-alphabet run before it is treated as a secret.
const REDACT_MIN_RUN: usize = 16;

/// Redact credential-shaped tokens from an error message so raw secrets
/// never reach logs or diagnostics.
///
/// A token is suspect when it is an unbroken run of key-alphabet
/// characters at least [`REDACT_MIN_RUN`] long that mixes in a digit —
/// long enough to rule out prose, and the digit requirement spares
/// identifiers like env-var names. A quarter of the token (at most six
/// characters) survives for correlation.
fn redact_secrets(msg: &str) -> String {
    fn flush(out: &mut String, run: &str) {
        if run.len() >= REDACT_MIN_RUN && run.chars().any(|c| c.is_ascii_digit()) {
            // The run is pure ASCII, so byte slicing is safe.
            let keep = (run.len() / 4).min(6);
            out.push_str(&run[..keep]);
            out.push_str("[redacted]");
        } else {
            out.push_str(run);
        }
    }

    let mut out = String::with_capacity(msg.len());
    let mut run = String::new();
    for c in msg.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            run.push(c);
        } else {
            flush(&mut out, &run);
            run.clear();
            out.push(c);
        }
    }
    flush(&mut out, &run);
    out
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// An empty registry; providers are added with [`insert`](Self::insert).
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            roles: HashMap::new(),
            init_errors: Vec::new(),
        }
    }

    /// Build the registry from the application's [`LlmConfig`].
    ///
    /// Providers that fail to initialize are logged and skipped.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut registry = Self::new();

        for pc in &config.providers {
            match OpenAiCompatProvider::from_config(pc) {
                Ok(provider) => {
                    tracing::info!(provider_id = %pc.id, "registered chat provider");
                    registry.providers.insert(pc.id.clone(), Arc::new(provider));
                }
                Err(e) => {
                    let safe_error = redact_secrets(&e.to_string());
                    tracing::warn!(
                        provider_id = %pc.id,
                        error = %safe_error,
                        "failed to initialize provider, skipping"
                    );
                    registry.init_errors.push(ProviderInitError {
                        provider_id: pc.id.clone(),
                        error: safe_error,
                    });
                }
            }
        }

        registry.roles = config.roles.clone();
        Ok(registry)
    }

    /// Add or replace a provider instance directly (tests, custom adapters).
    pub fn insert(&mut self, id: impl Into<String>, provider: Arc<dyn ChatProvider>) {
        self.providers.insert(id.into(), provider);
    }

    /// Assign a role to a `provider_id/model` spec.
    pub fn set_role(&mut self, role: impl Into<String>, spec: impl Into<String>) {
        self.roles.insert(role.into(), spec.into());
    }

    /// Look up a provider by its config id.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ChatProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Resolve a `provider_id/model` spec into a provider and an optional
    /// model override (`"main"` alone means "main's default model").
    pub fn resolve_spec(&self, spec: &str) -> Option<(Arc<dyn ChatProvider>, Option<String>)> {
        let provider_id = spec.split('/').next().unwrap_or(spec);
        let provider = self.providers.get(provider_id)?.clone();
        let model = spec.split_once('/').map(|(_, m)| m.to_string());
        Some((provider, model))
    }

    /// Resolve the provider assigned to a role (e.g. "chat", "summarizer").
    pub fn for_role(&self, role: &str) -> Option<(Arc<dyn ChatProvider>, Option<String>)> {
        self.resolve_spec(self.roles.get(role)?)
    }

    /// Any registered provider, used as the last fallback.
    pub fn any(&self) -> Option<Arc<dyn ChatProvider>> {
        self.providers.values().next().cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider initialization errors (empty if all succeeded).
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_domain::config::ProviderConfig;

    #[test]
    fn from_config_records_failures_without_aborting() {
        let config = LlmConfig {
            providers: vec![
                ProviderConfig {
                    id: "good".into(),
                    base_url: "https://api.example.com/v1".into(),
                    api_key_env: None,
                    api_key: Some("sk-test".into()),
                    default_model: Some("gpt-4o".into()),
                    timeout_secs: 5,
                },
                ProviderConfig {
                    id: "broken".into(),
                    base_url: "https://api.example.com/v1".into(),
                    api_key_env: Some("TRELLIS_TEST_UNSET_KEY".into()),
                    api_key: None,
                    default_model: None,
                    timeout_secs: 5,
                },
            ],
            roles: HashMap::from([("chat".into(), "good/gpt-4o".into())]),
        };

        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("good").is_some());
        assert_eq!(registry.init_errors().len(), 1);
        assert_eq!(registry.init_errors()[0].provider_id, "broken");
    }

    #[test]
    fn resolve_spec_splits_provider_and_model() {
        let config = LlmConfig {
            providers: vec![ProviderConfig {
                id: "main".into(),
                base_url: "https://api.example.com/v1".into(),
                api_key_env: None,
                api_key: Some("sk-test".into()),
                default_model: None,
                timeout_secs: 5,
            }],
            roles: HashMap::from([("summarizer".into(), "main/gpt-4o-mini".into())]),
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();

        let (provider, model) = registry.resolve_spec("main/gpt-4o-mini").unwrap();
        assert_eq!(provider.provider_id(), "main");
        assert_eq!(model.as_deref(), Some("gpt-4o-mini"));

        let (_, none_model) = registry.resolve_spec("main").unwrap();
        assert!(none_model.is_none());

        let (_, role_model) = registry.for_role("summarizer").unwrap();
        assert_eq!(role_model.as_deref(), Some("gpt-4o-mini"));
        assert!(registry.for_role("planner").is_none());
    }

    #[test]
    fn redact_secrets_hides_key_like_tokens() {
        let msg = "auth failed for key sk_live_abcdefghijklmnop123456 at provider";
        let redacted = redact_secrets(msg);
        assert!(!redacted.contains("sk_live_abcdefghijklmnop123456"));
        assert!(redacted.contains("[redacted]"));
        // Surrounding prose and a short correlation prefix survive.
        assert!(redacted.starts_with("auth failed for key sk_liv"));
        assert!(redacted.ends_with("at provider"));
    }

    #[test]
    fn redact_secrets_spares_prose_and_env_var_names() {
        let msg = "provider broken: env var TRELLIS_PROVIDER_API_KEY is unset or empty";
        assert_eq!(redact_secrets(msg), msg);
    }
}
