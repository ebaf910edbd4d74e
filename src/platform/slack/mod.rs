// ABOUTME: Slack adapter implementing MessageSender over a swappable Web API transport.
// ABOUTME: Supports threads via thread_ts; images are sent through the same upload as files.

#[cfg(feature = "slack")]
pub mod client;
pub mod format;

use async_trait::async_trait;
use maria_core::error::classify_by_rules;
use maria_core::{
    bounded, check_file, check_text, Capabilities, DispatchResult, ErrorTag, FileUpload,
    MessageSender, Operation, SpeechSynthesizer,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const PLATFORM_ID: &str = "slack";

/// Bound for one Web API call unless configured otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shortest id Slack issues: prefix letter plus eight characters
const MIN_ID_LEN: usize = 9;

/// Channel, DM, group or user id: `[CDGUW]` followed by upper-case alphanumerics
fn is_slack_id(target: &str) -> bool {
    let mut chars = target.chars();
    matches!(chars.next(), Some('C' | 'D' | 'G' | 'U' | 'W'))
        && target.len() >= MIN_ID_LEN
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Error-code substrings returned by the Slack Web API, first match wins
const ERROR_RULES: &[(&str, ErrorTag)] = &[
    ("channel_not_found", ErrorTag::TargetNotFound),
    ("user_not_found", ErrorTag::TargetNotFound),
    ("not_in_channel", ErrorTag::PermissionDenied),
    ("missing_scope", ErrorTag::PermissionDenied),
    ("not_authed", ErrorTag::PermissionDenied),
    ("invalid_auth", ErrorTag::PermissionDenied),
    ("is_archived", ErrorTag::PermissionDenied),
    ("ratelimited", ErrorTag::RateLimited),
    ("rate limit", ErrorTag::RateLimited),
    ("file too large", ErrorTag::PayloadTooLarge),
    ("file_too_large", ErrorTag::PayloadTooLarge),
    ("msg_too_long", ErrorTag::PayloadTooLarge),
    ("timed out", ErrorTag::Timeout),
    ("timeout", ErrorTag::Timeout),
];

/// Network side of the adapter. The live implementation wraps slack-morphism;
/// tests substitute a recorder.
#[async_trait]
pub trait SlackApi: Send + Sync {
    /// chat.postMessage; `text` is already mrkdwn
    async fn post_message(&self, channel: &str, text: &str, thread_ts: Option<&str>)
        -> anyhow::Result<Value>;

    /// External file upload, shared into `channel`
    async fn upload_file(
        &self,
        channel: &str,
        file: &FileUpload,
        thread_ts: Option<&str>,
    ) -> anyhow::Result<Value>;
}

pub struct SlackSender {
    api: Arc<dyn SlackApi>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    timeout: Duration,
}

impl SlackSender {
    pub fn new(api: Arc<dyn SlackApi>) -> Self {
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

    /// Audio replies are only advertised once a synthesizer is attached
    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    async fn upload(
        &self,
        operation: Operation,
        target: &str,
        file: &FileUpload,
        thread: Option<&str>,
    ) -> DispatchResult {
        let call = self.api.upload_file(target, file, thread);
        match bounded(self, operation, self.timeout, call).await {
            Ok(response) => {
                tracing::debug!(
                    channel = %target,
                    filename = %file.filename,
                    bytes = file.data.len(),
                    "Slack upload complete"
                );
                DispatchResult::delivered(PLATFORM_ID, operation, response)
            }
            Err(failed) => failed,
        }
    }
}

#[async_trait]
impl MessageSender for SlackSender {
    fn platform_id(&self) -> &'static str {
        PLATFORM_ID
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            audio: self.speech.is_some(),
            files: true,
            images: true,
            threads: true,
        }
    }

    fn validate_target(&self, target: &str) -> bool {
        is_slack_id(target.trim())
    }

    fn format_message(&self, text: &str) -> String {
        format::markdown_to_mrkdwn(text)
    }

    fn classify_error(&self, error: &anyhow::Error) -> ErrorTag {
        classify_by_rules(error, ERROR_RULES)
    }

    async fn send_text(&self, target: &str, text: &str, thread: Option<&str>) -> DispatchResult {
        if let Err(invalid) = check_text(self, Operation::SendText, target, text) {
            return invalid;
        }
        let formatted = self.format_message(text);
        let call = self.api.post_message(target.trim(), &formatted, thread);
        match bounded(self, Operation::SendText, self.timeout, call).await {
            Ok(response) => DispatchResult::delivered(PLATFORM_ID, Operation::SendText, response),
            Err(failed) => failed,
        }
    }

    async fn send_audio(
        &self,
        target: &str,
        text_to_speak: &str,
        thread: Option<&str>,
    ) -> DispatchResult {
        if let Err(invalid) = check_text(self, Operation::SendAudio, target, text_to_speak) {
            return invalid;
        }
        let Some(speech) = &self.speech else {
            return DispatchResult::invalid(
                PLATFORM_ID,
                Operation::SendAudio,
                "Speech synthesis is not configured",
            );
        };
        let audio = match speech.synthesize(text_to_speak).await {
            Ok(audio) => audio,
            Err(e) => return self.failure(Operation::SendAudio, &e),
        };
        let upload = FileUpload::new(audio.data, audio.filename);
        self.upload(Operation::SendAudio, target.trim(), &upload, thread)
            .await
    }

    async fn send_file(&self, target: &str, file: FileUpload, thread: Option<&str>) -> DispatchResult {
        if let Err(invalid) = check_file(self, Operation::SendFile, target, &file) {
            return invalid;
        }
        self.upload(Operation::SendFile, target.trim(), &file, thread)
            .await
    }

    // Slack has no separate image primitive; send_image uses the default file alias
}
