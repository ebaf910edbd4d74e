// ABOUTME: HTTP entrypoint accepting inbound chat events and queueing them as turns.
// ABOUTME: Provides POST /events, GET /health and GET /metrics behind a request trace layer.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use maria_core::config::WebhookConfig;
use maria_core::{metrics, InboundEvent, MessageRouter, TurnLoop};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

/// Largest accepted event text
pub const MAX_EVENT_TEXT_LENGTH: usize = 64 * 1024;

/// Events waiting for a worker before the endpoint starts shedding load
const QUEUE_CAPACITY: usize = 256;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
}

impl WebhookResponse {
    fn reply(status: StatusCode, success: bool, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success,
                message: message.into(),
            }),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub platforms: Vec<String>,
}

#[derive(Clone)]
pub struct WebhookState {
    api_key: Option<String>,
    router: Arc<MessageRouter>,
    job_tx: mpsc::Sender<InboundEvent>,
}

impl WebhookState {
    pub fn new(
        api_key: Option<String>,
        router: Arc<MessageRouter>,
        job_tx: mpsc::Sender<InboundEvent>,
    ) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            router,
            job_tx,
        }
    }
}

/// Spawn the worker that turns queued events into independent turns.
///
/// Each event runs on its own task; a slow turn never blocks later events.
pub fn spawn_turn_worker(turn_loop: Arc<TurnLoop>) -> mpsc::Sender<InboundEvent> {
    let (tx, mut rx) = mpsc::channel::<InboundEvent>(QUEUE_CAPACITY);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let turn_loop = Arc::clone(&turn_loop);
            tokio::spawn(async move {
                // handle_event logs its own failures
                if let Ok(outcome) = turn_loop.handle_event(event).await {
                    tracing::info!(
                        status = outcome.status.as_str(),
                        model_calls = outcome.model_calls,
                        delivered = outcome.delivery.is_success(),
                        "Turn finished"
                    );
                }
            });
        }
        tracing::info!("Turn worker stopped");
    });
    tx
}

/// Build the HTTP routes; `/metrics` is only mounted when a recorder is installed
pub fn webhook_routes(state: WebhookState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let mut app = Router::new()
        .route("/events", post(events_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    if let Some(handle) = metrics_handle {
        let metrics_routes = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(Arc::new(handle));
        app = app.merge(metrics_routes);
    }

    app.layer(TraceLayer::new_for_http())
}

/// Start the webhook HTTP server
pub async fn start_webhook_server(
    config: &WebhookConfig,
    turn_loop: Arc<TurnLoop>,
    metrics_handle: Option<PrometheusHandle>,
) -> Result<()> {
    let router = Arc::clone(turn_loop.router());
    let job_tx = spawn_turn_worker(turn_loop);
    let state = WebhookState::new(config.api_key.clone(), router, job_tx);
    let app = webhook_routes(state, metrics_handle);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(addr = %addr, "Starting webhook server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind webhook listener on {}", addr))?;
    axum::serve(listener, app)
        .await
        .context("Webhook server exited")?;

    Ok(())
}

/// Reject an event before it is queued
fn check_event(
    state: &WebhookState,
    headers: &HeaderMap,
    event: &InboundEvent,
) -> Result<(), (StatusCode, &'static str, String)> {
    if let Some(expected) = &state.api_key {
        let provided = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return Err((
                StatusCode::UNAUTHORIZED,
                "auth_failed",
                "Invalid or missing API key".to_string(),
            ));
        }
    }

    if event.chat_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "bad_request",
            "chat_id cannot be empty".to_string(),
        ));
    }
    if event.text.trim().is_empty() && event.attachments.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "bad_request",
            "Event needs text or attachments".to_string(),
        ));
    }
    if event.text.len() > MAX_EVENT_TEXT_LENGTH {
        return Err((
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!("Text too large (max {} bytes)", MAX_EVENT_TEXT_LENGTH),
        ));
    }
    if !state.router.is_supported(&event.platform) {
        let supported: Vec<String> = state.router.list_platforms().into_iter().collect();
        let err = maria_core::MessagingError::UnsupportedPlatform {
            platform: event.platform.clone(),
            supported,
        };
        return Err((StatusCode::BAD_REQUEST, "bad_request", err.to_string()));
    }
    Ok(())
}

/// Handle POST /events
pub async fn events_handler(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(event): Json<InboundEvent>,
) -> (StatusCode, Json<WebhookResponse>) {
    if let Err((status, outcome, message)) = check_event(&state, &headers, &event) {
        tracing::warn!(
            platform = %event.platform,
            chat_id = %event.chat_id,
            outcome,
            reason = %message,
            "Webhook event rejected"
        );
        metrics::record_webhook_request(outcome);
        return WebhookResponse::reply(status, false, message);
    }

    tracing::info!(
        platform = %event.platform,
        chat_id = %event.chat_id,
        attachments = event.attachments.len(),
        "Webhook event received"
    );

    match state.job_tx.try_send(event) {
        Ok(()) => {
            metrics::record_webhook_request("accepted");
            WebhookResponse::reply(StatusCode::ACCEPTED, true, "Event queued")
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            metrics::record_webhook_request("overloaded");
            WebhookResponse::reply(
                StatusCode::SERVICE_UNAVAILABLE,
                false,
                "Event queue is full, retry later",
            )
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::error!("Turn worker is gone, cannot queue event");
            metrics::record_webhook_request("unavailable");
            WebhookResponse::reply(
                StatusCode::SERVICE_UNAVAILABLE,
                false,
                "Event worker unavailable",
            )
        }
    }
}

/// Handle GET /health
pub async fn health_handler(State(state): State<WebhookState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        platforms: state.router.list_platforms().into_iter().collect(),
    })
}

/// Handle GET /metrics - returns Prometheus text format
async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use maria_core::{Capabilities, DispatchResult, FileUpload, MessageSender, Operation};
    use serde_json::json;

    struct NullSender;

    #[async_trait]
    impl MessageSender for NullSender {
        fn platform_id(&self) -> &'static str {
            "telegram"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
        async fn send_text(&self, _: &str, _: &str, _: Option<&str>) -> DispatchResult {
            DispatchResult::delivered("telegram", Operation::SendText, json!({}))
        }
        async fn send_audio(&self, _: &str, _: &str, _: Option<&str>) -> DispatchResult {
            DispatchResult::delivered("telegram", Operation::SendAudio, json!({}))
        }
        async fn send_file(&self, _: &str, _: FileUpload, _: Option<&str>) -> DispatchResult {
            DispatchResult::delivered("telegram", Operation::SendFile, json!({}))
        }
    }

    fn state(api_key: Option<&str>, capacity: usize) -> (WebhookState, mpsc::Receiver<InboundEvent>) {
        let router = Arc::new(MessageRouter::new());
        router.register("telegram", Arc::new(NullSender)).unwrap();
        let (tx, rx) = mpsc::channel(capacity);
        (WebhookState::new(api_key.map(String::from), router, tx), rx)
    }

    fn event() -> InboundEvent {
        InboundEvent::text("telegram", "12345", "hello")
    }

    fn with_key(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_event_is_queued() {
        let (state, mut rx) = state(None, 4);
        let (status, Json(body)) =
            events_handler(State(state), HeaderMap::new(), Json(event())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body.success);
        assert_eq!(rx.recv().await.unwrap().chat_id, "12345");
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let (state, mut rx) = state(Some("secret"), 4);
        let (status, _) =
            events_handler(State(state.clone()), HeaderMap::new(), Json(event())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) =
            events_handler(State(state.clone()), with_key("wrong"), Json(event())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = events_handler(State(state), with_key("secret"), Json(event())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_platform_rejected_with_supported_list() {
        let (state, mut rx) = state(None, 4);
        let mut bad = event();
        bad.platform = "discord".into();
        let (status, Json(body)) = events_handler(State(state), HeaderMap::new(), Json(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.message.contains("not supported"));
        assert!(body.message.contains("telegram"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_and_oversized_events_rejected() {
        let (state, _rx) = state(None, 4);
        let empty = InboundEvent::text("telegram", "12345", "   ");
        let (status, _) = events_handler(State(state.clone()), HeaderMap::new(), Json(empty)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let huge = InboundEvent::text("telegram", "12345", "x".repeat(MAX_EVENT_TEXT_LENGTH + 1));
        let (status, Json(body)) = events_handler(State(state), HeaderMap::new(), Json(huge)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.message.contains("too large"));
    }

    #[tokio::test]
    async fn test_full_queue_sheds_load() {
        let (state, _rx) = state(None, 1);
        let (status, _) = events_handler(State(state.clone()), HeaderMap::new(), Json(event())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, _) = events_handler(State(state), HeaderMap::new(), Json(event())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_lists_platforms() {
        let (state, _rx) = state(None, 1);
        let Json(health) = health_handler(State(state)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.platforms, vec!["telegram".to_string()]);
    }

    struct NotifyingSender(mpsc::UnboundedSender<(String, String)>);

    #[async_trait]
    impl MessageSender for NotifyingSender {
        fn platform_id(&self) -> &'static str {
            "telegram"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
        async fn send_text(&self, target: &str, text: &str, _: Option<&str>) -> DispatchResult {
            let _ = self.0.send((target.to_string(), text.to_string()));
            DispatchResult::delivered("telegram", Operation::SendText, json!({}))
        }
        async fn send_audio(&self, _: &str, _: &str, _: Option<&str>) -> DispatchResult {
            DispatchResult::delivered("telegram", Operation::SendAudio, json!({}))
        }
        async fn send_file(&self, _: &str, _: FileUpload, _: Option<&str>) -> DispatchResult {
            DispatchResult::delivered("telegram", Operation::SendFile, json!({}))
        }
    }

    #[tokio::test]
    async fn test_turn_worker_runs_queued_events() {
        use maria_agent::backends::mock::MockModelBackend;
        use maria_agent::{DispatcherConfig, ToolDispatcher, ToolRegistry};
        use maria_core::history::InMemoryHistoryStore;
        use maria_core::TurnLoopConfig;
        use std::time::Duration;

        let router = Arc::new(MessageRouter::new());
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        router
            .register("telegram", Arc::new(NotifyingSender(sent_tx)))
            .unwrap();
        let turn_loop = Arc::new(TurnLoop::new(
            Arc::new(MockModelBackend::new().respond_text("pong")),
            ToolDispatcher::new(Arc::new(ToolRegistry::new()), DispatcherConfig::default()),
            router,
            Arc::new(InMemoryHistoryStore::new()),
            TurnLoopConfig::default(),
        ));

        let tx = spawn_turn_worker(turn_loop);
        tx.send(InboundEvent::text("telegram", "12345", "ping"))
            .await
            .unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(5), sent_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, ("12345".to_string(), "pong".to_string()));
    }
}
