//! Method registry and async dispatch for inbound calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::RpcError;

/// Trait implemented by every inbound method handler.
///
/// Generic over the context type `C`, so channels serving different roles
/// (ordinary node vs. privileged admin) carry different state.
#[async_trait]
pub trait MethodHandler<C>: Send + Sync {
    /// Execute the handler with the given positional arguments and context.
    async fn handle(&self, args: Vec<Value>, ctx: &C) -> Result<Value, RpcError>;
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry<C> {
    handlers: HashMap<String, Arc<dyn MethodHandler<C>>>,
}

impl<C: Send + Sync> MethodRegistry<C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a method name, replacing any previous one.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler<C> + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Dispatch a call to the appropriate handler.
    pub async fn dispatch(&self, method: &str, args: Vec<Value>, ctx: &C) -> Result<Value, RpcError> {
        let Some(handler) = self.handlers.get(method) else {
            return Err(RpcError::MethodNotFound {
                method: method.to_owned(),
            });
        };
        handler.handle(args, ctx).await
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl<C: Send + Sync> Default for MethodRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
