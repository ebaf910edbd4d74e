// ABOUTME: Message router: registry of outbound adapters keyed by platform id.
// ABOUTME: Gates sends on advertised capabilities and converts adapter panics into failed results.

use crate::dispatch::{DispatchResult, Operation};
use crate::error::{ErrorTag, MessagingError};
use crate::metrics;
use crate::traits::{Capabilities, Capability, FileUpload, MessageSender, OutboundPayload};
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

/// Normalize a platform id to its registry key
pub(crate) fn normalize(platform_id: &str) -> String {
    platform_id.trim().to_lowercase()
}

/// Single dispatch surface over every registered platform.
///
/// Construct one per process and hand it to whatever needs to send.
/// Registration replaces any existing adapter under the same id.
#[derive(Default)]
pub struct MessageRouter {
    senders: RwLock<HashMap<String, Arc<dyn MessageSender>>>,
}

impl MessageRouter {
    /// Create a router with an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sender` under `platform_id`, replacing any previous adapter
    pub fn register(
        &self,
        platform_id: &str,
        sender: Arc<dyn MessageSender>,
    ) -> Result<(), MessagingError> {
        let key = normalize(platform_id);
        if key.is_empty() {
            return Err(MessagingError::validation("Platform id cannot be empty"));
        }

        let capabilities = sender.capabilities();
        let previous = self
            .senders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), sender);

        tracing::info!(
            platform = %key,
            replaced = previous.is_some(),
            audio = capabilities.audio,
            files = capabilities.files,
            images = capabilities.images,
            threads = capabilities.threads,
            "Registered message sender"
        );
        Ok(())
    }

    /// Remove the adapter for `platform_id`; returns whether one was removed
    pub fn unregister(&self, platform_id: &str) -> bool {
        let key = normalize(platform_id);
        let removed = self
            .senders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key)
            .is_some();
        if removed {
            tracing::info!(platform = %key, "Unregistered message sender");
        }
        removed
    }

    pub fn is_supported(&self, platform_id: &str) -> bool {
        self.senders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&normalize(platform_id))
    }

    pub fn list_platforms(&self) -> BTreeSet<String> {
        self.senders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// The adapter currently registered under `platform_id`
    pub fn get_messenger(&self, platform_id: &str) -> Option<Arc<dyn MessageSender>> {
        self.senders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&normalize(platform_id))
            .cloned()
    }

    pub fn capabilities(&self, platform_id: &str) -> Result<Capabilities, MessagingError> {
        Ok(self.lookup(platform_id)?.capabilities())
    }

    pub async fn send_text(
        &self,
        platform_id: &str,
        target: &str,
        text: &str,
        thread: Option<&str>,
    ) -> Result<DispatchResult, MessagingError> {
        self.send(platform_id, target, OutboundPayload::Text(text.to_string()), thread)
            .await
    }

    pub async fn send_audio(
        &self,
        platform_id: &str,
        target: &str,
        text_to_speak: &str,
        thread: Option<&str>,
    ) -> Result<DispatchResult, MessagingError> {
        self.send(
            platform_id,
            target,
            OutboundPayload::Audio(text_to_speak.to_string()),
            thread,
        )
        .await
    }

    pub async fn send_file(
        &self,
        platform_id: &str,
        target: &str,
        file: FileUpload,
        thread: Option<&str>,
    ) -> Result<DispatchResult, MessagingError> {
        self.send(platform_id, target, OutboundPayload::File(file), thread)
            .await
    }

    pub async fn send_image(
        &self,
        platform_id: &str,
        target: &str,
        image: FileUpload,
        thread: Option<&str>,
    ) -> Result<DispatchResult, MessagingError> {
        self.send(platform_id, target, OutboundPayload::Image(image), thread)
            .await
    }

    /// Deliver any payload.
    ///
    /// Errors only for an unknown platform or a capability the adapter does
    /// not advertise; both are checked before the adapter is touched.
    pub async fn send(
        &self,
        platform_id: &str,
        target: &str,
        payload: OutboundPayload,
        thread: Option<&str>,
    ) -> Result<DispatchResult, MessagingError> {
        let key = normalize(platform_id);
        let sender = self.lookup(&key)?;
        if let Some(capability) = payload.required_capability() {
            Self::require(&key, sender.capabilities(), capability)?;
        }

        let operation = payload.operation();
        tracing::debug!(
            platform = %key,
            operation = %operation,
            target = %target,
            thread = ?thread,
            "Dispatching outbound message"
        );

        let call = async {
            match payload {
                OutboundPayload::Text(text) => sender.send_text(target, &text, thread).await,
                OutboundPayload::Audio(text) => sender.send_audio(target, &text, thread).await,
                OutboundPayload::File(file) => sender.send_file(target, file, thread).await,
                OutboundPayload::Image(image) => sender.send_image(target, image, thread).await,
            }
        };
        let result = guarded(&key, operation, call).await;

        metrics::record_dispatch(&key, operation, result.outcome_label());
        Ok(result)
    }

    fn lookup(&self, platform_id: &str) -> Result<Arc<dyn MessageSender>, MessagingError> {
        self.get_messenger(platform_id)
            .ok_or_else(|| MessagingError::UnsupportedPlatform {
                platform: platform_id.trim().to_string(),
                supported: self.list_platforms().into_iter().collect(),
            })
    }

    fn require(
        platform_id: &str,
        capabilities: Capabilities,
        capability: Capability,
    ) -> Result<(), MessagingError> {
        if capabilities.supports(capability) {
            return Ok(());
        }
        tracing::debug!(
            platform = %platform_id,
            capability = %capability,
            "Rejected send for unsupported capability"
        );
        Err(MessagingError::UnsupportedCapability {
            platform: platform_id.to_string(),
            capability: capability.to_string(),
        })
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("platforms", &self.list_platforms())
            .finish()
    }
}

/// Run an adapter call, turning a panic into a failed result
async fn guarded<F>(platform_id: &str, operation: Operation, call: F) -> DispatchResult
where
    F: Future<Output = DispatchResult>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(
                platform = %platform_id,
                operation = %operation,
                panic = %message,
                "Message sender panicked"
            );
            DispatchResult::failed(
                platform_id,
                operation,
                ErrorTag::Unknown,
                format!("Adapter panicked during {}: {}", operation, message),
            )
        }
    }
}
