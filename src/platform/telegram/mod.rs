// ABOUTME: Telegram adapter implementing MessageSender over a swappable Bot API transport.
// ABOUTME: No thread support (references are logged and ignored); photos use a distinct send.

#[cfg(feature = "telegram")]
pub mod client;

use crate::utils::chunk_message;
use async_trait::async_trait;
use maria_core::error::classify_by_rules;
use maria_core::{
    bounded, check_file, check_text, Capabilities, DispatchResult, ErrorTag, FileUpload,
    MessageSender, Operation, SpeechSynthesizer,
};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const PLATFORM_ID: &str = "telegram";

/// Bound for one Bot API call unless configured otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bot API limit for one text message
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Numeric chat ids stay within this magnitude
const MAX_CHAT_ID: i64 = 1_000_000_000_000;

const ERROR_RULES: &[(&str, ErrorTag)] = &[
    ("chat not found", ErrorTag::TargetNotFound),
    ("user not found", ErrorTag::TargetNotFound),
    ("bot was blocked", ErrorTag::PermissionDenied),
    ("bot was kicked", ErrorTag::PermissionDenied),
    ("not enough rights", ErrorTag::PermissionDenied),
    ("forbidden", ErrorTag::PermissionDenied),
    ("too many requests", ErrorTag::RateLimited),
    ("retry after", ErrorTag::RateLimited),
    ("request entity too large", ErrorTag::PayloadTooLarge),
    ("file is too big", ErrorTag::PayloadTooLarge),
    ("message is too long", ErrorTag::PayloadTooLarge),
    ("timed out", ErrorTag::Timeout),
    ("timeout", ErrorTag::Timeout),
];

/// A parsed Telegram chat target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelegramChat {
    Id(i64),
    /// Public username including the leading `@`
    Username(String),
}

impl TelegramChat {
    pub fn parse(target: &str) -> Option<Self> {
        let target = target.trim();
        if let Some(name) = target.strip_prefix('@') {
            let valid = (5..=32).contains(&name.len())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            return valid.then(|| Self::Username(target.to_string()));
        }
        target
            .parse::<i64>()
            .ok()
            .filter(|id| (-MAX_CHAT_ID..=MAX_CHAT_ID).contains(id))
            .map(Self::Id)
    }
}

impl std::fmt::Display for TelegramChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Username(name) => f.write_str(name),
        }
    }
}

/// Network side of the adapter. The live implementation wraps teloxide.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn send_message(&self, chat: &TelegramChat, text: &str) -> anyhow::Result<Value>;
    async fn send_audio(&self, chat: &TelegramChat, audio: &FileUpload) -> anyhow::Result<Value>;
    async fn send_document(&self, chat: &TelegramChat, file: &FileUpload) -> anyhow::Result<Value>;
    async fn send_photo(&self, chat: &TelegramChat, image: &FileUpload) -> anyhow::Result<Value>;
}

pub struct TelegramSender {
    api: Arc<dyn TelegramApi>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    timeout: Duration,
}

impl TelegramSender {
    pub fn new(api: Arc<dyn TelegramApi>) -> Self {
        Self {
            api,
            speech: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    fn ignore_thread(&self, operation: Operation, thread: Option<&str>) {
        if let Some(thread) = thread {
            tracing::debug!(
                operation = %operation,
                thread = %thread,
                "Telegram has no threads, ignoring thread reference"
            );
        }
    }

    // Callers validate the target first, so parse cannot fail here
    fn chat(&self, operation: Operation, target: &str) -> Result<TelegramChat, DispatchResult> {
        TelegramChat::parse(target).ok_or_else(|| {
            DispatchResult::invalid(
                PLATFORM_ID,
                operation,
                format!("Invalid {} chat target: {}", PLATFORM_ID, target),
            )
        })
    }

    async fn settle<F>(&self, operation: Operation, call: F) -> DispatchResult
    where
        F: Future<Output = anyhow::Result<Value>>,
    {
        match bounded(self, operation, self.timeout, call).await {
            Ok(response) => DispatchResult::delivered(PLATFORM_ID, operation, response),
            Err(failed) => failed,
        }
    }
}

/// Failure after part of a chunked message already went out
fn partial_failure(failed: DispatchResult, delivered: usize, total: usize) -> DispatchResult {
    DispatchResult::failed(
        PLATFORM_ID,
        failed.operation,
        failed.error_type().unwrap_or(ErrorTag::Unknown),
        format!(
            "{} of {} chunks delivered before failure: {}",
            delivered,
            total,
            failed.error_message().unwrap_or_default()
        ),
    )
}

#[async_trait]
impl MessageSender for TelegramSender {
    fn platform_id(&self) -> &'static str {
        PLATFORM_ID
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            audio: self.speech.is_some(),
            files: true,
            images: true,
            threads: false,
        }
    }

    fn validate_target(&self, target: &str) -> bool {
        TelegramChat::parse(target).is_some()
    }

    fn classify_error(&self, error: &anyhow::Error) -> ErrorTag {
        classify_by_rules(error, ERROR_RULES)
    }

    async fn send_text(&self, target: &str, text: &str, thread: Option<&str>) -> DispatchResult {
        let operation = Operation::SendText;
        if let Err(invalid) = check_text(self, operation, target, text) {
            return invalid;
        }
        self.ignore_thread(operation, thread);
        let chat = match self.chat(operation, target) {
            Ok(chat) => chat,
            Err(invalid) => return invalid,
        };

        let text = self.format_message(text);
        let chunks = chunk_message(&text, MAX_MESSAGE_LENGTH);
        let mut responses = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let call = self.api.send_message(&chat, chunk);
            match bounded(self, operation, self.timeout, call).await {
                Ok(response) => responses.push(response),
                Err(failed) if index == 0 => return failed,
                Err(failed) => return partial_failure(failed, index, chunks.len()),
            }
        }

        let response = if responses.len() == 1 {
            responses.remove(0)
        } else {
            json!({ "chunks": responses })
        };
        DispatchResult::delivered(PLATFORM_ID, operation, response)
    }

    async fn send_audio(
        &self,
        target: &str,
        text_to_speak: &str,
        thread: Option<&str>,
    ) -> DispatchResult {
        let operation = Operation::SendAudio;
        if let Err(invalid) = check_text(self, operation, target, text_to_speak) {
            return invalid;
        }
        self.ignore_thread(operation, thread);
        let Some(speech) = &self.speech else {
            return DispatchResult::invalid(
                PLATFORM_ID,
                operation,
                "Speech synthesis is not configured",
            );
        };
        let chat = match self.chat(operation, target) {
            Ok(chat) => chat,
            Err(invalid) => return invalid,
        };

        let audio = match speech.synthesize(text_to_speak).await {
            Ok(audio) => audio,
            Err(e) => return self.failure(operation, &e),
        };
        let upload = FileUpload::new(audio.data, audio.filename);
        self.settle(operation, self.api.send_audio(&chat, &upload))
            .await
    }

    async fn send_file(&self, target: &str, file: FileUpload, thread: Option<&str>) -> DispatchResult {
        let operation = Operation::SendFile;
        if let Err(invalid) = check_file(self, operation, target, &file) {
            return invalid;
        }
        self.ignore_thread(operation, thread);
        let chat = match self.chat(operation, target) {
            Ok(chat) => chat,
            Err(invalid) => return invalid,
        };
        self.settle(operation, self.api.send_document(&chat, &file))
            .await
    }

    async fn send_image(&self, target: &str, image: FileUpload, thread: Option<&str>) -> DispatchResult {
        let operation = Operation::SendImage;
        if let Err(invalid) = check_file(self, operation, target, &image) {
            return invalid;
        }
        self.ignore_thread(operation, thread);
        let chat = match self.chat(operation, target) {
            Ok(chat) => chat,
            Err(invalid) => return invalid,
        };
        self.settle(operation, self.api.send_photo(&chat, &image))
            .await
    }
}
