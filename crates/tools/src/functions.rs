//! Local function registry — the executable side of the tool catalog.
//!
//! Handlers are async closures registered once at startup and dispatched
//! by name during turns. The registry is safe for concurrent execution;
//! registration after startup is unusual but permitted.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;

use trellis_domain::error::{Error, Result};

use crate::registry::ToolRegistry;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;
type Handler = Arc<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct FunctionRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `name`. One handler per name; a duplicate
    /// registration is a configuration error.
    pub fn register<F, Fut>(&self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let name = name.into();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&name) {
            return Err(Error::Config(format!(
                "function {name:?} is already registered"
            )));
        }
        let handler: Handler = Arc::new(move |args| -> HandlerFuture { Box::pin(f(args)) });
        handlers.insert(name, handler);
        Ok(())
    }

    /// [`register`](Self::register), panicking on duplicates. Startup only.
    pub fn must_register<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let name = name.into();
        if let Err(e) = self.register(name.clone(), f) {
            panic!("must_register({name:?}): {e}");
        }
    }

    /// Dispatch to the registered handler. Handler failures come back as
    /// `ToolExecution` so callers can fold them into tool-result messages.
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> Result<String> {
        let handler = self
            .handlers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ToolUnknown(name.to_owned()))?;

        handler(args).await.map_err(|e| match e {
            Error::ToolExecution { .. } => e,
            other => Error::ToolExecution {
                name: name.to_owned(),
                message: other.to_string(),
            },
        })
    }

    /// Error out if any active catalog tool has no registered handler.
    pub fn validate_all(&self, catalog: &ToolRegistry) -> Result<()> {
        let handlers = self.handlers.read();
        let missing: Vec<&str> = catalog
            .all()
            .iter()
            .filter(|t| t.is_executable() && !handlers.contains_key(&t.name))
            .map(|t| t.name.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "active tools without handlers: {}",
                missing.join(", ")
            )))
        }
    }

    /// Snapshot of registered names (sorted, for diagnostics).
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}
