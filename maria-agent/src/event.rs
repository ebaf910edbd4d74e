// ABOUTME: Conversation turn, model response and tool-call types shared by backends and dispatcher.
// ABOUTME: Tool results carry a structured JSON error payload when a call fails.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the conversation sent to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Image URLs attached to a user turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    /// Tool invocations requested by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set on tool turns; correlates the result with its request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatTurn {
    fn new(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            image_urls: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, Some(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, Some(text.into()))
    }

    pub fn user_with_images(text: impl Into<String>, image_urls: Vec<String>) -> Self {
        Self {
            image_urls,
            ..Self::user(text)
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Some(text.into()))
    }

    /// Assistant turn that requested tool calls (content is usually empty)
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn tool_result(result: &ToolCallResult) -> Self {
        Self {
            tool_call_id: Some(result.call_id.clone()),
            name: Some(result.function_name.clone()),
            ..Self::new(Role::Tool, Some(result.content.clone()))
        }
    }
}

/// Audio reply returned by models that can answer with speech
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioReply {
    pub transcript: String,
}

/// Model output for one call: either final content or tool calls
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Final text: message content, falling back to the audio transcript
    pub fn final_text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| self.audio.as_ref().map(|a| a.transcript.as_str()))
    }
}

/// A function invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub function_name: String,
    /// Raw JSON arguments as produced by the model
    #[serde(default)]
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, function_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            function_name: function_name.into(),
            arguments: arguments.to_string(),
        }
    }

    /// Parse the argument string. An empty string means no arguments.
    pub fn parsed_arguments(&self) -> Result<Value> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        let value: Value = serde_json::from_str(&self.arguments).with_context(|| {
            format!("Invalid JSON arguments for {}", self.function_name)
        })?;
        match value {
            Value::Object(_) => Ok(value),
            Value::Null => Ok(Value::Object(Default::default())),
            other => anyhow::bail!(
                "Arguments for {} must be a JSON object, got {}",
                self.function_name,
                other
            ),
        }
    }
}

/// Why a tool call produced an error payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// No function registered under the requested name
    UnknownFunction,
    /// Arguments were not a JSON object
    InvalidArguments,
    /// The function returned an error
    Failed,
    /// The call exceeded its time bound
    Timeout,
    /// The function panicked
    Panicked,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownFunction => "unknown_function",
            Self::InvalidArguments => "invalid_arguments",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Panicked => "panicked",
        }
    }
}

/// Result of one tool call, fed back to the model as a tool turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    pub call_id: String,
    pub function_name: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Successful result. Strings pass through, anything else is serialized.
    pub fn success(request: &ToolCallRequest, value: Value) -> Self {
        let content = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Self {
            call_id: request.call_id.clone(),
            function_name: request.function_name.clone(),
            content,
            is_error: false,
        }
    }

    pub fn error(request: &ToolCallRequest, kind: ToolErrorKind, message: impl Into<String>) -> Self {
        let payload = json!({
            "error": message.into(),
            "error_type": kind,
            "function_name": request.function_name,
        });
        Self {
            call_id: request.call_id.clone(),
            function_name: request.function_name.clone(),
            content: payload.to_string(),
            is_error: true,
        }
    }
}
