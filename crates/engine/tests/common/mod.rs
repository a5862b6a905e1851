//! Shared fixtures: scripted mock providers, a knowledge tree on disk, and
//! a hand-built runtime state over the in-memory store.
#![allow(dead_code)] // each test binary uses a different subset

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use trellis_domain::config::Config;
use trellis_domain::error::{Error, Result};
use trellis_domain::{RequestContext, ToolCall, Usage};
use trellis_engine::{CancelMap, RuntimeState};
use trellis_knowledge::NodeRepository;
use trellis_providers::{ChatProvider, ChatRequest, ChatResponse, ProviderRegistry};
use trellis_sessions::MemoryStore;
use trellis_tools::FunctionRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replays a queue of canned responses and records every request.
pub struct MockProvider {
    responses: Mutex<VecDeque<ChatResponse>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    pub fn scripted(responses: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl ChatProvider for MockProvider {
    async fn chat(&self, _ctx: &RequestContext, req: ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(req);
        self.responses.lock().pop_front().ok_or_else(|| Error::Provider {
            provider: "mock".into(),
            message: "script exhausted".into(),
        })
    }

    fn provider_id(&self) -> &str {
        "mock"
    }
}

/// A provider that parks inside `chat` until released, so tests can hold a
/// turn in flight deterministically.
pub struct GateProvider {
    pub entered: Arc<tokio::sync::Semaphore>,
    pub release: Arc<tokio::sync::Semaphore>,
    reply: String,
}

impl GateProvider {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            entered: Arc::new(tokio::sync::Semaphore::new(0)),
            release: Arc::new(tokio::sync::Semaphore::new(0)),
            reply: reply.into(),
        })
    }
}

#[async_trait::async_trait]
impl ChatProvider for GateProvider {
    async fn chat(&self, _ctx: &RequestContext, _req: ChatRequest) -> Result<ChatResponse> {
        self.entered.add_permits(1);
        let permit = self.release.acquire().await.map_err(|_| Error::Provider {
            provider: "gate".into(),
            message: "gate closed".into(),
        })?;
        permit.forget();
        Ok(text(&self.reply))
    }

    fn provider_id(&self) -> &str {
        "gate"
    }
}

// ── Response builders ──────────────────────────────────────────────

pub fn text(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.into(),
        tool_calls: vec![],
        usage: Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        },
        model: "mock-model".into(),
        finish_reason: Some("stop".into()),
    }
}

pub fn tool_call(call_id: &str, name: &str, arguments: &str) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        tool_calls: vec![ToolCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }],
        usage: Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        },
        model: "mock-model".into(),
        finish_reason: Some("tool_calls".into()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Knowledge tree & runtime state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A root node saying "Hello" with an `echo` tool, a temporarily disabled
/// `analyze` tool, and a hidden `covert` tool.
pub fn knowledge_tree() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("node.yaml"), "id: root\ntitle: Hello\n").unwrap();
    std::fs::write(root.join("node.md"), "Hello").unwrap();
    std::fs::write(
        root.join("tools.json"),
        serde_json::json!({
            "tools": [
                {
                    "name": "echo",
                    "description": "repeat the argument",
                    "input_schema": {
                        "type": "object",
                        "properties": { "arg": { "type": "string" } }
                    }
                },
                {
                    "name": "analyze",
                    "description": "heavy analysis",
                    "status": "temporary_disabled",
                    "disable_reason": "maintenance"
                },
                {
                    "name": "covert",
                    "description": "internal only",
                    "status": "hidden"
                }
            ]
        })
        .to_string(),
    )
    .unwrap();
    tmp
}

/// Log capture for failing tests; `RUST_LOG=debug cargo test` shows it.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Runtime state over the given tree and provider, with an `echo` handler
/// registered. `tweak` adjusts the config before it is frozen.
pub fn runtime_state(
    tree: &Path,
    provider: Arc<dyn ChatProvider>,
    tweak: impl FnOnce(&mut Config),
) -> RuntimeState {
    init_tracing();
    let mut config = Config::default();
    config.knowledge.root_dir = tree.to_path_buf();
    config.scheduler.disable_logs = true;
    tweak(&mut config);

    let mut providers = ProviderRegistry::new();
    providers.insert("mock", provider);

    let functions = FunctionRegistry::new();
    functions
        .register("echo", |args: serde_json::Value| async move {
            Ok(args
                .get("arg")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned())
        })
        .unwrap();

    RuntimeState {
        config: Arc::new(config),
        providers: Arc::new(providers),
        repository: Arc::new(NodeRepository::open(tree, None).unwrap()),
        functions: Arc::new(functions),
        store: Arc::new(MemoryStore::new()),
        cancel_map: Arc::new(CancelMap::new()),
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::new("u1")
}
