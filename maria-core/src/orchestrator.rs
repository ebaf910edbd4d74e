// ABOUTME: Turn loop: inbound event -> conversation -> model -> tool dispatch loop -> delivery.
// ABOUTME: Sequential per turn; fans out only for attachments and tool calls.

use crate::{
    config::Config,
    conversation::{ConversationBuilder, ConversationContext, DefaultConversationBuilder},
    dispatch::{DispatchResult, Operation},
    error::ErrorTag,
    history::{HistoryEntry, HistoryStore},
    metrics,
    router::MessageRouter,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use maria_agent::{
    Attachment, AttachmentResolver, ChatTurn, ModelBackend, ToolCallRequest, ToolCallResult,
    ToolCallSink, ToolDispatcher,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reply delivered when the model keeps requesting tools past the iteration bound
pub const ITERATION_LIMIT_REPLY: &str =
    "I'm sorry, I couldn't finish working on that request. Please try again or rephrase it.";

/// Reply delivered when the model returns neither content nor tool calls
pub const EMPTY_REPLY: &str = "I'm sorry, I don't have an answer for that.";

/// Attachments resolved at once for a single event
const ATTACHMENT_CONCURRENCY: usize = 4;

/// A message received from a platform
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InboundEvent {
    pub platform: String,
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Sender asked for a spoken reply (e.g. sent a voice note)
    #[serde(default)]
    pub prefers_audio: bool,
}

impl InboundEvent {
    pub fn text(
        platform: impl Into<String>,
        chat_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            chat_id: chat_id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model produced final content
    Completed,
    /// The iteration bound was hit and the apology reply was sent
    IterationLimit,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::IterationLimit => "iteration_limit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub reply: String,
    /// Model calls made during the turn
    pub model_calls: usize,
    pub tool_results: Vec<ToolCallResult>,
    pub delivery: DispatchResult,
}

#[derive(Debug, Clone)]
pub struct TurnLoopConfig {
    pub system_prompt: String,
    pub assistant_prompt: Option<String>,
    pub max_iterations: usize,
    pub model_timeout: Duration,
    pub history_limit: usize,
    pub skip_persist: HashSet<String>,
}

impl Default for TurnLoopConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for TurnLoopConfig {
    fn from(config: &Config) -> Self {
        Self {
            system_prompt: config.model.system_prompt.clone(),
            assistant_prompt: config.model.assistant_prompt.clone(),
            max_iterations: config.model.max_iterations.max(1),
            model_timeout: config.model.timeout(),
            history_limit: config.history.limit,
            skip_persist: config.tools.skip_persist.iter().cloned().collect(),
        }
    }
}

/// Collects successful tool calls of one turn.
///
/// Entries are held until the turn finishes so they land in history after the
/// user message that triggered them, and not at all when the turn fails.
struct HistoryToolSink {
    platform: String,
    chat_id: String,
    thread: Option<String>,
    skip: HashSet<String>,
    pending: Mutex<Vec<HistoryEntry>>,
}

impl HistoryToolSink {
    fn new(event: &InboundEvent, skip: HashSet<String>) -> Self {
        Self {
            platform: event.platform.clone(),
            chat_id: event.chat_id.clone(),
            thread: event.thread.clone(),
            skip,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn take(&self) -> Vec<HistoryEntry> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl ToolCallSink for HistoryToolSink {
    fn should_persist(&self, request: &ToolCallRequest) -> bool {
        !self.skip.contains(&request.function_name)
    }

    async fn persist(&self, request: &ToolCallRequest, result: &ToolCallResult) -> Result<()> {
        let message = format!(
            "Called {}({}) -> {}",
            request.function_name, request.arguments, result.content
        );
        let entry = HistoryEntry::assistant(&self.platform, &self.chat_id, message)
            .with_thread(self.thread.clone());
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
        Ok(())
    }
}

/// Drives one inbound event through the model and tool loop
pub struct TurnLoop {
    model: Arc<dyn ModelBackend>,
    dispatcher: ToolDispatcher,
    router: Arc<MessageRouter>,
    history: Arc<dyn HistoryStore>,
    builder: Arc<dyn ConversationBuilder>,
    resolver: Option<Arc<dyn AttachmentResolver>>,
    config: TurnLoopConfig,
}

impl TurnLoop {
    pub fn new(
        model: Arc<dyn ModelBackend>,
        dispatcher: ToolDispatcher,
        router: Arc<MessageRouter>,
        history: Arc<dyn HistoryStore>,
        config: TurnLoopConfig,
    ) -> Self {
        Self {
            model,
            dispatcher,
            router,
            history,
            builder: Arc::new(DefaultConversationBuilder),
            resolver: None,
            config,
        }
    }

    pub fn with_builder(mut self, builder: Arc<dyn ConversationBuilder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AttachmentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Run one full turn for `event` and deliver the reply through the router.
    ///
    /// Errors only when the event is empty or the model/storage calls fail;
    /// delivery problems are reported in [`TurnOutcome::delivery`].
    pub async fn handle_event(&self, event: InboundEvent) -> Result<TurnOutcome> {
        let result = self.run_turn(&event).await;
        match &result {
            Ok(outcome) => metrics::record_turn(outcome.status.as_str()),
            Err(e) => {
                metrics::record_turn("failed");
                tracing::error!(
                    platform = %event.platform,
                    chat_id = %event.chat_id,
                    error = %format!("{:#}", e),
                    "Turn failed"
                );
            }
        }
        result
    }

    async fn run_turn(&self, event: &InboundEvent) -> Result<TurnOutcome> {
        if event.text.trim().is_empty() && event.attachments.is_empty() {
            anyhow::bail!("Inbound event has neither text nor attachments");
        }

        tracing::info!(
            platform = %event.platform,
            chat_id = %event.chat_id,
            attachments = event.attachments.len(),
            "Handling inbound event"
        );

        let (attachment_texts, image_urls) = self.resolve_attachments(&event.attachments).await;

        let history = self
            .history
            .recent(&event.platform, &event.chat_id, self.config.history_limit)
            .await
            .context("Failed to load message history")?;
        let summary = self
            .history
            .summary(&event.platform, &event.chat_id)
            .await
            .context("Failed to load history summary")?;

        let mut conversation = self.builder.build(&ConversationContext {
            system_text: &self.config.system_prompt,
            assistant_text: self.config.assistant_prompt.as_deref(),
            display_name: event.display_name.as_deref(),
            history_summary: summary.as_deref(),
            history: &history,
            user_text: &event.text,
            attachment_texts: &attachment_texts,
            image_urls: &image_urls,
        });

        let tools = self.dispatcher.registry().definitions();
        let sink = Arc::new(HistoryToolSink::new(event, self.config.skip_persist.clone()));
        let dispatcher = self.dispatcher.clone().with_sink(sink.clone());

        let mut model_calls = 0;
        let mut tool_results = Vec::new();
        let mut final_reply = None;

        while model_calls < self.config.max_iterations {
            model_calls += 1;
            let response = tokio::time::timeout(
                self.config.model_timeout,
                self.model.complete(&conversation, &tools),
            )
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Model call timed out after {}s",
                    self.config.model_timeout.as_secs()
                )
            })?
            .with_context(|| format!("Model call via {} failed", self.model.name()))?;

            let calls = match response.tool_calls.clone() {
                Some(calls) if !calls.is_empty() => calls,
                _ => {
                    final_reply = Some(
                        response
                            .final_text()
                            .map(str::to_string)
                            .unwrap_or_else(|| EMPTY_REPLY.to_string()),
                    );
                    break;
                }
            };

            tracing::debug!(
                iteration = model_calls,
                tool_calls = calls.len(),
                "Model requested tool calls"
            );

            conversation.push(ChatTurn::assistant_tool_calls(
                response.content.clone(),
                calls.clone(),
            ));
            let results = dispatcher.dispatch(calls).await;
            for result in &results {
                metrics::record_tool_call(
                    &result.function_name,
                    if result.is_error { "error" } else { "success" },
                );
                conversation.push(ChatTurn::tool_result(result));
            }
            tool_results.extend(results);
        }

        let (status, reply) = match final_reply {
            Some(reply) => (TurnStatus::Completed, reply),
            None => {
                tracing::warn!(
                    chat_id = %event.chat_id,
                    iterations = model_calls,
                    "Iteration limit reached without final content"
                );
                (TurnStatus::IterationLimit, ITERATION_LIMIT_REPLY.to_string())
            }
        };

        self.persist_exchange(event, &image_urls, sink.take(), &reply)
            .await;
        let delivery = self.deliver(event, &reply).await;

        Ok(TurnOutcome {
            status,
            reply,
            model_calls,
            tool_results,
            delivery,
        })
    }

    /// Resolve every attachment concurrently, keeping attachment order.
    ///
    /// Images are passed to the model by URL; everything else becomes text.
    async fn resolve_attachments(&self, attachments: &[Attachment]) -> (Vec<String>, Vec<String>) {
        let (images, documents): (Vec<Attachment>, Vec<Attachment>) =
            attachments.iter().cloned().partition(Attachment::is_image);
        let image_urls: Vec<String> = images.into_iter().map(|a| a.url).collect();

        let texts = stream::iter(documents)
            .map(|attachment| {
                let resolver = self.resolver.clone();
                resolve_one(resolver, attachment)
            })
            .buffered(ATTACHMENT_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        (texts, image_urls)
    }

    async fn persist_exchange(
        &self,
        event: &InboundEvent,
        image_urls: &[String],
        tool_entries: Vec<HistoryEntry>,
        reply: &str,
    ) {
        let user = HistoryEntry::user(&event.platform, &event.chat_id, &event.text)
            .with_thread(event.thread.clone())
            .with_images(image_urls.to_vec());
        let assistant = HistoryEntry::assistant(&event.platform, &event.chat_id, reply)
            .with_thread(event.thread.clone());

        let entries = std::iter::once(user)
            .chain(tool_entries)
            .chain(std::iter::once(assistant));
        for entry in entries {
            if let Err(e) = self.history.append(entry).await {
                tracing::warn!(
                    chat_id = %event.chat_id,
                    error = %format!("{:#}", e),
                    "Failed to persist message"
                );
            }
        }
    }

    async fn deliver(&self, event: &InboundEvent, reply: &str) -> DispatchResult {
        let thread = event.thread.as_deref();
        let wants_audio = event.prefers_audio
            && self
                .router
                .capabilities(&event.platform)
                .map(|c| c.audio)
                .unwrap_or(false);

        let (operation, sent) = if wants_audio {
            (
                Operation::SendAudio,
                self.router
                    .send_audio(&event.platform, &event.chat_id, reply, thread)
                    .await,
            )
        } else {
            (
                Operation::SendText,
                self.router
                    .send_text(&event.platform, &event.chat_id, reply, thread)
                    .await,
            )
        };

        let result = sent.unwrap_or_else(|e| {
            DispatchResult::failed(&event.platform, operation, ErrorTag::Validation, e.to_string())
        });
        if !result.is_success() {
            tracing::warn!(
                platform = %event.platform,
                chat_id = %event.chat_id,
                operation = %operation,
                error = ?result.error_message(),
                "Reply delivery failed"
            );
        }
        result
    }
}

/// Turn one non-image attachment into text for the model; failures become a note
async fn resolve_one(resolver: Option<Arc<dyn AttachmentResolver>>, attachment: Attachment) -> String {
    let unreadable = || format!("[Attachment {}: could not be read]", attachment.display_name());
    let Some(resolver) = resolver else {
        return unreadable();
    };
    match resolver.resolve(&attachment).await {
        Ok(text) => format!("[Attachment {}]\n{}", attachment.display_name(), text),
        Err(e) => {
            tracing::warn!(
                attachment = %attachment.display_name(),
                error = %format!("{:#}", e),
                "Failed to resolve attachment"
            );
            unreadable()
        }
    }
}
