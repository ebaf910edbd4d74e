// ABOUTME: Registry of callable functions the model may invoke, keyed by function name.
// ABOUTME: Built once at startup; the dispatcher looks handlers up by name per call.

use crate::traits::ToolDefinition;
use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Boxed future returned by a tool handler
pub type ToolFuture = BoxFuture<'static, Result<Value>>;

/// Handler invoked with the parsed JSON arguments object
pub type ToolHandler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// Static mapping from function name to handler + schema
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a function under `definition.name`. Later registrations replace earlier ones.
    pub fn register<F, Fut>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.insert(definition, handler);
        self
    }

    /// Non-consuming variant of [`register`](Self::register)
    pub fn insert<F, Fut>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler,
            },
        );
    }

    /// Move every tool of `other` into this registry
    pub fn merge(mut self, other: ToolRegistry) -> Self {
        self.tools.extend(other.tools);
        self
    }

    /// Look up a handler by function name
    pub fn get(&self, name: &str) -> Option<ToolHandler> {
        self.tools.get(name).map(|t| Arc::clone(&t.handler))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered function names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Schemas for every registered function, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
