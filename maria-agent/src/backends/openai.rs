// ABOUTME: OpenAI-compatible HTTP backends: chat completions, speech synthesis and transcription.
// ABOUTME: Every request carries a bounded timeout; generative calls get the longest one.

use crate::event::{AudioReply, ChatTurn, ModelResponse, Role, ToolCallRequest};
use crate::traits::{
    Attachment, AttachmentResolver, ModelBackend, SpeechAudio, SpeechSynthesizer, ToolDefinition,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Longest text body fed to the model from a fetched attachment
const MAX_ATTACHMENT_CHARS: usize = 8000;

/// Connection settings shared by the OpenAI-compatible clients
#[derive(Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiConfig {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

async fn error_for_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("{} API error ({}): {}", what, status, body)
}

// =============================================================================
// Chat completions
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default)]
    audio: Option<AudioReply>,
}

fn to_wire_message(turn: &ChatTurn) -> WireMessage {
    let content = if turn.image_urls.is_empty() {
        turn.content.clone().map(Value::String)
    } else {
        let mut parts = vec![json!({
            "type": "text",
            "text": turn.content.clone().unwrap_or_default(),
        })];
        parts.extend(
            turn.image_urls
                .iter()
                .map(|url| json!({"type": "image_url", "image_url": {"url": url}})),
        );
        Some(Value::Array(parts))
    };

    let tool_calls = turn
        .tool_calls
        .iter()
        .map(|call| WireToolCall {
            id: call.call_id.clone(),
            call_type: function_type(),
            function: WireFunctionCall {
                name: call.function_name.clone(),
                arguments: call.arguments.clone(),
            },
        })
        .collect();

    WireMessage {
        role: turn.role.as_str(),
        content,
        tool_calls,
        tool_call_id: if turn.role == Role::Tool {
            turn.tool_call_id.clone()
        } else {
            None
        },
    }
}

fn from_response_message(message: ResponseMessage) -> ModelResponse {
    let tool_calls = message
        .tool_calls
        .filter(|calls| !calls.is_empty())
        .map(|calls| {
            calls
                .into_iter()
                .map(|call| ToolCallRequest {
                    call_id: call.id,
                    function_name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect()
        });

    ModelResponse {
        content: message.content,
        audio: message.audio,
        tool_calls,
    }
}

/// Chat-completions backend for any OpenAI-compatible endpoint
pub struct OpenAiBackend {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout)?,
            config,
        })
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        conversation: &[ChatTurn],
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: conversation.iter().map(to_wire_message).collect(),
            tools: tools
                .iter()
                .map(|function| WireTool {
                    tool_type: "function",
                    function,
                })
                .collect(),
            tool_choice: (!tools.is_empty()).then_some("auto"),
            max_tokens: self.config.max_tokens,
        };

        let url = self.config.endpoint("chat/completions");
        tracing::debug!(
            url = %url,
            turns = conversation.len(),
            tools = tools.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send chat completion request")?;
        let response = error_for_status(response, "Chat completion").await?;

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        chat.choices
            .into_iter()
            .next()
            .map(|choice| from_response_message(choice.message))
            .context("Chat completion returned no choices")
    }
}

// =============================================================================
// Speech synthesis
// =============================================================================

/// Text-to-speech through the audio/speech endpoint
pub struct OpenAiSpeech {
    client: reqwest::Client,
    config: OpenAiConfig,
    voice: String,
}

impl OpenAiSpeech {
    /// `config.model` is the speech model (e.g. "tts-1")
    pub fn new(config: OpenAiConfig, voice: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout)?,
            config,
            voice: voice.into(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio> {
        let body = json!({
            "model": self.config.model,
            "voice": self.voice,
            "input": text,
            "response_format": "mp3",
        });

        let response = self
            .client
            .post(self.config.endpoint("audio/speech"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send speech request")?;
        let response = error_for_status(response, "Speech").await?;

        let data = response
            .bytes()
            .await
            .context("Failed to read synthesized audio")?
            .to_vec();

        tracing::debug!(bytes = data.len(), "Speech synthesized");

        Ok(SpeechAudio {
            data,
            filename: "response.mp3".to_string(),
            mime_type: "audio/mpeg".to_string(),
        })
    }
}

// =============================================================================
// Attachment resolution
// =============================================================================

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Fetches inbound attachments and turns them into text.
///
/// Audio goes through the transcription endpoint (`config.model` is the
/// transcription model, e.g. "whisper-1"); `text/*` bodies are inlined.
pub struct HttpAttachmentResolver {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl HttpAttachmentResolver {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout)?,
            config,
        })
    }

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&attachment.url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", attachment.display_name()))?;
        let response = error_for_status(response, "Attachment download").await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn transcribe(&self, attachment: &Attachment, data: Vec<u8>) -> Result<String> {
        let filename = attachment
            .name
            .clone()
            .unwrap_or_else(|| "audio.ogg".to_string());
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(filename)
            .mime_str(&attachment.mime_type)
            .context("Invalid attachment MIME type")?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.config.model.clone())
            .part("file", part);

        let response = self
            .client
            .post(self.config.endpoint("audio/transcriptions"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .context("Failed to send transcription request")?;
        let response = error_for_status(response, "Transcription").await?;

        let transcription: TranscriptionResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;
        Ok(transcription.text)
    }
}

#[async_trait]
impl AttachmentResolver for HttpAttachmentResolver {
    async fn resolve(&self, attachment: &Attachment) -> Result<String> {
        if attachment.is_audio() {
            let data = self.download(attachment).await?;
            return self.transcribe(attachment, data).await;
        }

        if attachment.mime_type.starts_with("text/") {
            let data = self.download(attachment).await?;
            let text = String::from_utf8_lossy(&data);
            return Ok(truncate_chars(&text, MAX_ATTACHMENT_CHARS));
        }

        Ok(format!(
            "Attachment {} ({}) cannot be read as text",
            attachment.display_name(),
            attachment.mime_type
        ))
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_message_plain_text() {
        let wire = to_wire_message(&ChatTurn::user("hello"));
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn test_wire_message_with_images_uses_content_parts() {
        let turn = ChatTurn::user_with_images("what is this?", vec!["https://x/img.png".into()]);
        let value = serde_json::to_value(to_wire_message(&turn)).unwrap();
        let parts = value["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["image_url"]["url"], "https://x/img.png");
    }

    #[test]
    fn test_wire_message_tool_calls_and_results() {
        let call = ToolCallRequest::new("call_1", "get_weather_data", json!({"location": "Lagos"}));
        let assistant = ChatTurn::assistant_tool_calls(None, vec![call.clone()]);
        let value = serde_json::to_value(to_wire_message(&assistant)).unwrap();
        assert_eq!(value["tool_calls"][0]["id"], "call_1");
        assert_eq!(value["tool_calls"][0]["type"], "function");
        assert_eq!(value["tool_calls"][0]["function"]["name"], "get_weather_data");
        assert!(value.get("content").is_none());

        let result = crate::event::ToolCallResult::success(&call, json!("sunny"));
        let value = serde_json::to_value(to_wire_message(&ChatTurn::tool_result(&result))).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
        assert_eq!(value["content"], "sunny");
    }

    #[test]
    fn test_parse_tool_call_response() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "get_coordinates", "arguments": "{\"location\":\"Paris\"}"}
                    }]
                }
            }]
        });
        let chat: ChatResponse = serde_json::from_value(raw).unwrap();
        let response = from_response_message(chat.choices.into_iter().next().unwrap().message);
        assert!(response.has_tool_calls());
        let calls = response.tool_calls.unwrap();
        assert_eq!(calls[0].call_id, "call_9");
        assert_eq!(calls[0].parsed_arguments().unwrap()["location"], "Paris");
    }

    #[test]
    fn test_parse_audio_response() {
        let raw = json!({
            "choices": [{"message": {"content": null, "audio": {"transcript": "hi there"}}}]
        });
        let chat: ChatResponse = serde_json::from_value(raw).unwrap();
        let response = from_response_message(chat.choices.into_iter().next().unwrap().message);
        assert_eq!(response.final_text(), Some("hi there"));
        assert!(response.tool_calls.is_none());
    }

    #[test]
    fn test_empty_tool_call_list_is_dropped() {
        let message = ResponseMessage {
            content: Some("done".into()),
            tool_calls: Some(vec![]),
            audio: None,
        };
        assert!(from_response_message(message).tool_calls.is_none());
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé…");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = OpenAiConfig {
            base_url: "https://api.openai.com/v1/".into(),
            api_key: "sk-test".into(),
            model: "gpt-4o".into(),
            max_tokens: 1024,
            timeout: Duration::from_secs(5),
        };
        assert_eq!(
            config.endpoint("chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert!(!format!("{:?}", config).contains("sk-test"));
    }
}
