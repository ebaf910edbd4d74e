// ABOUTME: Concurrent tool-call dispatcher: fans out one model turn's tool calls and joins the results.
// ABOUTME: Guarantees exactly one result per request; failures become JSON error payloads.

use crate::event::{ModelResponse, ToolCallRequest, ToolCallResult, ToolErrorKind};
use crate::registry::{ToolHandler, ToolRegistry};
use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Receives successful tool calls that should be written to message history.
///
/// Which calls get persisted is policy, decided by `should_persist`; the
/// dispatcher only provides the mechanism.
#[async_trait]
pub trait ToolCallSink: Send + Sync {
    fn should_persist(&self, request: &ToolCallRequest) -> bool;

    async fn persist(&self, request: &ToolCallRequest, result: &ToolCallResult) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum tool calls executing at once across all dispatches
    pub max_concurrency: usize,
    /// Upper bound for a single tool call
    pub call_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// Executes tool calls against a [`ToolRegistry`] on a bounded worker pool
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    config: DispatcherConfig,
    permits: Arc<Semaphore>,
    sink: Option<Arc<dyn ToolCallSink>>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, config: DispatcherConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            registry,
            config,
            permits,
            sink: None,
        }
    }

    /// Attach a sink that persists selected successful calls
    pub fn with_sink(mut self, sink: Arc<dyn ToolCallSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch the tool calls attached to a model response.
    ///
    /// Errors only when the response carries no tool-call list at all, which
    /// is a caller bug rather than a runtime condition.
    pub async fn dispatch_response(&self, response: &ModelResponse) -> Result<Vec<ToolCallResult>> {
        let Some(calls) = response.tool_calls.as_ref() else {
            anyhow::bail!("Model response carries no tool-call list");
        };
        Ok(self.dispatch(calls.clone()).await)
    }

    /// Run every request concurrently and collect one result per request.
    ///
    /// Results are returned in completion order; correlate them by `call_id`.
    pub async fn dispatch(&self, calls: Vec<ToolCallRequest>) -> Vec<ToolCallResult> {
        if calls.is_empty() {
            return Vec::new();
        }

        tracing::info!(count = calls.len(), "Dispatching tool calls");

        let mut workers = JoinSet::new();
        for (index, request) in calls.iter().cloned().enumerate() {
            let handler = self.registry.get(&request.function_name);
            let permits = Arc::clone(&self.permits);
            let timeout = self.config.call_timeout;
            let sink = self.sink.clone();

            workers.spawn(async move {
                let result = execute_call(handler, &request, permits, timeout).await;
                if !result.is_error {
                    if let Some(sink) = sink.filter(|s| s.should_persist(&request)) {
                        if let Err(e) = sink.persist(&request, &result).await {
                            tracing::warn!(
                                call_id = %request.call_id,
                                function = %request.function_name,
                                error = %e,
                                "Failed to persist tool call"
                            );
                        }
                    }
                }
                (index, result)
            });
        }

        let mut completed = vec![false; calls.len()];
        let mut results = Vec::with_capacity(calls.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, result)) => {
                    completed[index] = true;
                    results.push(result);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Tool call worker failed to join");
                }
            }
        }

        // A worker that died outside the guarded call still owes its caller a result
        for (request, done) in calls.iter().zip(completed) {
            if !done {
                results.push(ToolCallResult::error(
                    request,
                    ToolErrorKind::Panicked,
                    "Tool call worker terminated unexpectedly",
                ));
            }
        }

        results
    }
}

async fn execute_call(
    handler: Option<ToolHandler>,
    request: &ToolCallRequest,
    permits: Arc<Semaphore>,
    timeout: Duration,
) -> ToolCallResult {
    let Some(handler) = handler else {
        tracing::warn!(function = %request.function_name, "Model requested unknown function");
        return ToolCallResult::error(
            request,
            ToolErrorKind::UnknownFunction,
            format!("Unknown function: {}", request.function_name),
        );
    };

    let args = match request.parsed_arguments() {
        Ok(args) => args,
        Err(e) => {
            return ToolCallResult::error(request, ToolErrorKind::InvalidArguments, format!("{:#}", e))
        }
    };

    let Ok(_permit) = permits.acquire_owned().await else {
        return ToolCallResult::error(request, ToolErrorKind::Failed, "Dispatcher is shut down");
    };

    let started = Instant::now();
    let call = AssertUnwindSafe(async move { handler(args).await }).catch_unwind();
    let result = match tokio::time::timeout(timeout, call).await {
        Err(_) => ToolCallResult::error(
            request,
            ToolErrorKind::Timeout,
            format!(
                "{} timed out after {}s",
                request.function_name,
                timeout.as_secs()
            ),
        ),
        Ok(Err(panic)) => ToolCallResult::error(
            request,
            ToolErrorKind::Panicked,
            format!("{} panicked: {}", request.function_name, panic_message(&*panic)),
        ),
        Ok(Ok(Err(e))) => ToolCallResult::error(request, ToolErrorKind::Failed, format!("{:#}", e)),
        Ok(Ok(Ok(value))) => ToolCallResult::success(request, value),
    };

    tracing::debug!(
        call_id = %request.call_id,
        function = %request.function_name,
        duration_ms = started.elapsed().as_millis() as u64,
        is_error = result.is_error,
        "Tool call finished"
    );

    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }

    #[test]
    fn test_default_config_bounds() {
        let config = DispatcherConfig::default();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.call_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_zero_concurrency_still_gets_a_permit() {
        let dispatcher = ToolDispatcher::new(
            Arc::new(ToolRegistry::new()),
            DispatcherConfig {
                max_concurrency: 0,
                call_timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(dispatcher.permits.available_permits(), 1);
    }
}
