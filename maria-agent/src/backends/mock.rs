// ABOUTME: Mock model backend for testing - replays pre-configured responses.
// ABOUTME: Records every conversation it receives so tests can assert on what the model saw.
//!
//! # Example
//!
//! ```no_run
//! use maria_agent::backends::mock::MockModelBackend;
//! use maria_agent::{ModelBackend, ToolCallRequest};
//! use serde_json::json;
//!
//! # async fn example() {
//! let mock = MockModelBackend::new()
//!     .on_prompt("weather")
//!     .respond_tool_calls(vec![ToolCallRequest::new(
//!         "call_1",
//!         "get_weather_data",
//!         json!({"location": "Paris"}),
//!     )])
//!     .then()
//!     .respond_text("It is sunny in Paris");
//!
//! let reply = mock.complete(&[], &[]).await.unwrap();
//! assert!(reply.has_tool_calls());
//! # }
//! ```

use crate::event::{ChatTurn, ModelResponse, Role, ToolCallRequest};
use crate::traits::{ModelBackend, ToolDefinition};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

enum Scripted {
    Reply(ModelResponse),
    Error(String),
}

struct Expectation {
    /// Substring of the latest user turn; empty matches anything
    pattern: String,
    reply: Scripted,
}

/// Mock backend for testing
#[derive(Clone, Default)]
pub struct MockModelBackend {
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    received: Arc<Mutex<Vec<Vec<ChatTurn>>>>,
    tools_seen: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockModelBackend {
    /// Create a new mock backend with no expectations
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up an expectation for a conversation whose latest user turn contains `pattern`
    pub fn on_prompt(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            backend: self,
            pattern: pattern.to_string(),
        }
    }

    /// Queue a response for the next call regardless of prompt
    pub fn respond_with(self, response: ModelResponse) -> Self {
        self.on_prompt("").respond_with(response)
    }

    pub fn respond_text(self, text: &str) -> Self {
        self.respond_with(ModelResponse::text(text))
    }

    pub fn respond_tool_calls(self, calls: Vec<ToolCallRequest>) -> Self {
        self.respond_with(ModelResponse::with_tool_calls(calls))
    }

    pub fn respond_error(self, message: &str) -> Self {
        self.on_prompt("").respond_error(message)
    }

    /// Readability helper for chained scripts
    pub fn then(self) -> Self {
        self
    }

    /// Conversations received so far, one entry per `complete` call
    pub fn received(&self) -> Vec<Vec<ChatTurn>> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Tool names offered on each call
    pub fn tools_seen(&self) -> Vec<Vec<String>> {
        self.tools_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Number of scripted replies not yet consumed
    pub fn pending(&self) -> usize {
        self.expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn push(&self, pattern: String, reply: Scripted) {
        self.expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Expectation { pattern, reply });
    }

    fn take_matching(&self, prompt: &str) -> Option<Scripted> {
        let mut exp = self.expectations.lock().unwrap_or_else(|e| e.into_inner());
        // Front of the queue first so in-order scripts stay deterministic
        if exp.front().is_some_and(|e| prompt.contains(&e.pattern)) {
            return exp.pop_front().map(|e| e.reply);
        }
        exp.iter()
            .position(|e| prompt.contains(&e.pattern))
            .and_then(|i| exp.remove(i))
            .map(|e| e.reply)
    }
}

fn latest_user_text(conversation: &[ChatTurn]) -> String {
    conversation
        .iter()
        .rev()
        .find(|turn| turn.role == Role::User)
        .and_then(|turn| turn.content.clone())
        .unwrap_or_default()
}

#[async_trait]
impl ModelBackend for MockModelBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(
        &self,
        conversation: &[ChatTurn],
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(conversation.to_vec());
        self.tools_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tools.iter().map(|t| t.name.clone()).collect());

        let prompt = latest_user_text(conversation);
        match self.take_matching(&prompt) {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Error(message)) => anyhow::bail!("{}", message),
            None => Ok(ModelResponse::text(format!(
                "Mock: no expectation for '{}'",
                prompt
            ))),
        }
    }
}

/// Builder for setting up mock expectations with a fluent API
pub struct ExpectationBuilder {
    backend: MockModelBackend,
    pattern: String,
}

impl ExpectationBuilder {
    pub fn respond_with(self, response: ModelResponse) -> MockModelBackend {
        self.backend.push(self.pattern, Scripted::Reply(response));
        self.backend
    }

    pub fn respond_text(self, text: &str) -> MockModelBackend {
        self.respond_with(ModelResponse::text(text))
    }

    pub fn respond_tool_calls(self, calls: Vec<ToolCallRequest>) -> MockModelBackend {
        self.respond_with(ModelResponse::with_tool_calls(calls))
    }

    /// Fail the matching call with `message`
    pub fn respond_error(self, message: &str) -> MockModelBackend {
        self.backend
            .push(self.pattern, Scripted::Error(message.to_string()));
        self.backend
    }
}
