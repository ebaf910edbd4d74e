// ABOUTME: Core ModelBackend trait that every language-model backend implements.
// ABOUTME: Also defines the tool schema handed to the model alongside the conversation.

use crate::event::{ChatTurn, ModelResponse};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Function schema advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Synthesized speech ready to be uploaded as an audio attachment
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub data: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

/// File referenced by an inbound message (voice note, document, web page)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Attachment {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Text-to-speech collaborator used by adapters that deliver audio replies
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio>;
}

/// Turns an inbound attachment into text the model can read
#[async_trait]
pub trait AttachmentResolver: Send + Sync {
    async fn resolve(&self, attachment: &Attachment) -> Result<String>;
}

/// A language model reachable through a single request/response call.
///
/// Implementations must bound every network call with a timeout; an error
/// returned here aborts the current turn, so transient failures should be
/// reported rather than retried forever.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend name for logging and metrics
    fn name(&self) -> &'static str;

    /// Send the conversation plus tool schemas and return the model's reply
    async fn complete(&self, conversation: &[ChatTurn], tools: &[ToolDefinition])
        -> Result<ModelResponse>;
}
