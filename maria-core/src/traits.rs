// ABOUTME: Capability contract every outbound messaging adapter implements.
// ABOUTME: Defines capability flags, outbound payloads and the pre-I/O validation helpers.

use crate::dispatch::{DispatchResult, Operation};
use crate::error::ErrorTag;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

// =============================================================================
// Capabilities
// =============================================================================

/// A single optional feature an adapter may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Audio,
    Files,
    Images,
    Threads,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Files => "files",
            Self::Images => "images",
            Self::Threads => "threads",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed support flags for one adapter instance
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Capabilities {
    pub audio: bool,
    pub files: bool,
    pub images: bool,
    pub threads: bool,
}

impl Capabilities {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Audio => self.audio,
            Capability::Files => self.files,
            Capability::Images => self.images,
            Capability::Threads => self.threads,
        }
    }
}

// =============================================================================
// Outbound payloads
// =============================================================================

/// Binary attachment for file and image sends
#[derive(Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub data: Vec<u8>,
    pub filename: String,
    pub caption: Option<String>,
}

impl FileUpload {
    pub fn new(data: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            filename: filename.into(),
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into()).filter(|c: &String| !c.trim().is_empty());
        self
    }
}

// Bytes are summarized so logs never dump file contents
impl std::fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileUpload")
            .field("filename", &self.filename)
            .field("bytes", &self.data.len())
            .field("caption", &self.caption)
            .finish()
    }
}

/// Payload of one outbound send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text(String),
    /// Text to be synthesized into speech
    Audio(String),
    File(FileUpload),
    Image(FileUpload),
}

impl OutboundPayload {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Text(_) => Operation::SendText,
            Self::Audio(_) => Operation::SendAudio,
            Self::File(_) => Operation::SendFile,
            Self::Image(_) => Operation::SendImage,
        }
    }

    /// Capability the target adapter must advertise, if any
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            Self::Text(_) => None,
            Self::Audio(_) => Some(Capability::Audio),
            Self::File(_) => Some(Capability::Files),
            Self::Image(_) => Some(Capability::Images),
        }
    }
}

// =============================================================================
// Capability contract
// =============================================================================

/// Outbound side of one messaging platform.
///
/// Sends never return `Err`: validation problems and platform failures both
/// come back as a failed [`DispatchResult`], so callers check one channel.
/// Validation happens before any network call.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Platform identifier (e.g., "slack", "telegram")
    fn platform_id(&self) -> &'static str;

    /// Constant for the lifetime of the adapter
    fn capabilities(&self) -> Capabilities;

    /// Platform-specific chat target grammar
    fn validate_target(&self, target: &str) -> bool {
        !target.trim().is_empty()
    }

    /// Convert outgoing text to the platform's markup
    fn format_message(&self, text: &str) -> String {
        text.to_string()
    }

    /// Map a platform failure to an error tag
    fn classify_error(&self, _error: &anyhow::Error) -> ErrorTag {
        ErrorTag::Unknown
    }

    async fn send_text(&self, target: &str, text: &str, thread: Option<&str>) -> DispatchResult;

    /// Synthesize `text_to_speak` and deliver it as an audio attachment
    async fn send_audio(
        &self,
        target: &str,
        text_to_speak: &str,
        thread: Option<&str>,
    ) -> DispatchResult;

    async fn send_file(&self, target: &str, file: FileUpload, thread: Option<&str>)
        -> DispatchResult;

    /// Defaults to a file send for platforms without a distinct image primitive
    async fn send_image(
        &self,
        target: &str,
        image: FileUpload,
        thread: Option<&str>,
    ) -> DispatchResult {
        self.send_file(target, image, thread)
            .await
            .with_operation(Operation::SendImage)
    }

    /// Convert a caught platform error into a failed result
    fn failure(&self, operation: Operation, error: &anyhow::Error) -> DispatchResult {
        let tag = self.classify_error(error);
        tracing::warn!(
            platform = self.platform_id(),
            operation = %operation,
            error_type = %tag,
            error = %format!("{:#}", error),
            "Platform send failed"
        );
        DispatchResult::failed(self.platform_id(), operation, tag, format!("{:#}", error))
    }
}

// =============================================================================
// Pre-I/O validation
// =============================================================================

/// Check target and text for a text or audio send
pub fn check_text<S: MessageSender + ?Sized>(
    sender: &S,
    operation: Operation,
    target: &str,
    text: &str,
) -> Result<(), DispatchResult> {
    check_target(sender, operation, target)?;
    if text.trim().is_empty() {
        return Err(DispatchResult::invalid(
            sender.platform_id(),
            operation,
            "Message text cannot be empty",
        ));
    }
    Ok(())
}

/// Check target, bytes and filename for a file or image send
pub fn check_file<S: MessageSender + ?Sized>(
    sender: &S,
    operation: Operation,
    target: &str,
    file: &FileUpload,
) -> Result<(), DispatchResult> {
    check_target(sender, operation, target)?;
    if file.data.is_empty() {
        return Err(DispatchResult::invalid(
            sender.platform_id(),
            operation,
            "File data cannot be empty",
        ));
    }
    if file.filename.trim().is_empty() {
        return Err(DispatchResult::invalid(
            sender.platform_id(),
            operation,
            "Filename cannot be empty",
        ));
    }
    Ok(())
}

fn check_target<S: MessageSender + ?Sized>(
    sender: &S,
    operation: Operation,
    target: &str,
) -> Result<(), DispatchResult> {
    if target.trim().is_empty() {
        return Err(DispatchResult::invalid(
            sender.platform_id(),
            operation,
            "Chat target cannot be empty",
        ));
    }
    if !sender.validate_target(target) {
        return Err(DispatchResult::invalid(
            sender.platform_id(),
            operation,
            format!("Invalid {} chat target: {}", sender.platform_id(), target),
        ));
    }
    Ok(())
}

// =============================================================================
// Bounded transport calls
// =============================================================================

/// Await one transport call under `limit`.
///
/// Platform errors go through [`MessageSender::failure`]; an elapsed bound
/// becomes an [`ErrorTag::Timeout`] failure.
pub async fn bounded<S, T, F>(
    sender: &S,
    operation: Operation,
    limit: Duration,
    call: F,
) -> Result<T, DispatchResult>
where
    S: MessageSender + ?Sized,
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(sender.failure(operation, &e)),
        Err(_) => {
            tracing::warn!(
                platform = sender.platform_id(),
                operation = %operation,
                timeout_secs = limit.as_secs(),
                "Platform call timed out"
            );
            Err(DispatchResult::failed(
                sender.platform_id(),
                operation,
                ErrorTag::Timeout,
                format!(
                    "{} call timed out after {}s",
                    sender.platform_id(),
                    limit.as_secs()
                ),
            ))
        }
    }
}
