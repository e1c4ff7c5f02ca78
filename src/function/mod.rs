//! Function catalog
//!
//! Resolves a target's endpoint reference to something invocable. Handlers
//! receive a JSON event and return a JSON result, the same contract an
//! independently deployed function exposes.

mod builtin;

pub use builtin::{EchoHandler, GreetHandler};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by the handler itself
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An invocable function
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(&self, event: Value) -> Result<Value, HandlerError>;
}

/// Endpoint reference → handler
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in handlers registered
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.insert("builtin:greet", Arc::new(GreetHandler));
        catalog.insert("builtin:echo", Arc::new(EchoHandler));
        catalog
    }

    pub fn insert(&mut self, endpoint: &str, handler: Arc<dyn Handler>) {
        self.handlers.insert(endpoint.to_string(), handler);
    }

    pub fn resolve(&self, endpoint: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(endpoint).cloned()
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.handlers.contains_key(endpoint)
    }
}
