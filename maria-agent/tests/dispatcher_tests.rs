// ABOUTME: Integration tests for the concurrent tool-call dispatcher.
// ABOUTME: Covers one-result-per-request, fault isolation, timeouts, panics and the persist hook.

use anyhow::Result;
use async_trait::async_trait;
use maria_agent::{
    DispatcherConfig, ModelResponse, ToolCallRequest, ToolCallResult, ToolCallSink, ToolDefinition,
    ToolDispatcher, ToolRegistry,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

fn def(name: &str) -> ToolDefinition {
    ToolDefinition::new(name, format!("{} test tool", name), json!({"type": "object"}))
}

fn weather_registry() -> ToolRegistry {
    ToolRegistry::new()
        .register(def("get_weather_data"), |args: Value| async move {
            let location = args["location"].as_str().unwrap_or("nowhere").to_string();
            Ok(json!(format!("Sunny, 31C in {}", location)))
        })
        .register(def("echo"), |args: Value| async move { Ok(args) })
        .register(def("fail"), |_args: Value| async move {
            Err(anyhow::anyhow!("upstream returned 503"))
        })
}

fn dispatcher(registry: ToolRegistry) -> ToolDispatcher {
    ToolDispatcher::new(Arc::new(registry), DispatcherConfig::default())
}

fn payload(result: &ToolCallResult) -> Value {
    serde_json::from_str(&result.content).expect("error payload is JSON")
}

fn by_id<'a>(results: &'a [ToolCallResult], call_id: &str) -> &'a ToolCallResult {
    results
        .iter()
        .find(|r| r.call_id == call_id)
        .unwrap_or_else(|| panic!("no result for call_id {}", call_id))
}

#[tokio::test]
async fn test_weather_and_unknown_function_each_get_a_result() {
    let dispatcher = dispatcher(weather_registry());
    let results = dispatcher
        .dispatch(vec![
            ToolCallRequest::new("1", "get_weather_data", json!({"location": "Lagos"})),
            ToolCallRequest::new("2", "nonexistent_fn", json!({})),
        ])
        .await;

    assert_eq!(results.len(), 2);

    let weather = by_id(&results, "1");
    assert!(!weather.is_error);
    assert_eq!(weather.content, "Sunny, 31C in Lagos");

    let unknown = by_id(&results, "2");
    assert!(unknown.is_error);
    let error = payload(unknown);
    assert_eq!(error["error_type"], "unknown_function");
    assert_eq!(error["function_name"], "nonexistent_fn");
    assert!(error["error"].as_str().unwrap().contains("nonexistent_fn"));
}

#[tokio::test]
async fn test_one_result_per_request_with_duplicates_and_unknowns() {
    let dispatcher = dispatcher(weather_registry());
    let requests: Vec<ToolCallRequest> = (0..12)
        .map(|i| {
            let name = match i % 4 {
                0 => "echo",
                1 => "fail",
                2 => "missing",
                _ => "get_weather_data",
            };
            ToolCallRequest::new(format!("call_{}", i), name, json!({"n": i}))
        })
        .collect();

    let results = dispatcher.dispatch(requests.clone()).await;

    assert_eq!(results.len(), requests.len());
    let ids: HashSet<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
    let expected: HashSet<&str> = requests.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_empty_request_list_returns_empty() {
    let results = dispatcher(weather_registry()).dispatch(vec![]).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_failing_call_does_not_affect_siblings() {
    let dispatcher = dispatcher(weather_registry());
    let results = dispatcher
        .dispatch(vec![
            ToolCallRequest::new("a", "echo", json!({"x": 1})),
            ToolCallRequest::new("b", "fail", json!({})),
            ToolCallRequest::new("c", "get_weather_data", json!({"location": "Abuja"})),
        ])
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(by_id(&results, "a").content, r#"{"x":1}"#);
    assert_eq!(by_id(&results, "c").content, "Sunny, 31C in Abuja");

    let failed = by_id(&results, "b");
    assert!(failed.is_error);
    let error = payload(failed);
    assert_eq!(error["error_type"], "failed");
    assert!(error["error"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn test_panicking_call_is_isolated() {
    let registry = weather_registry().register(def("explode"), |_args: Value| async move {
        if true {
            panic!("tool blew up");
        }
        Ok(json!(null))
    });
    let results = dispatcher(registry)
        .dispatch(vec![
            ToolCallRequest::new("ok", "echo", json!({"y": 2})),
            ToolCallRequest::new("boom", "explode", json!({})),
        ])
        .await;

    assert_eq!(results.len(), 2);
    assert!(!by_id(&results, "ok").is_error);
    let error = payload(by_id(&results, "boom"));
    assert_eq!(error["error_type"], "panicked");
    assert!(error["error"].as_str().unwrap().contains("tool blew up"));
}

#[tokio::test]
async fn test_invalid_arguments_produce_error_result() {
    let dispatcher = dispatcher(weather_registry());
    let request = ToolCallRequest {
        call_id: "bad".into(),
        function_name: "echo".into(),
        arguments: "{not json".into(),
    };
    let results = dispatcher.dispatch(vec![request]).await;
    assert_eq!(results.len(), 1);
    assert_eq!(payload(&results[0])["error_type"], "invalid_arguments");
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_call_still_produces_result() {
    let registry = weather_registry().register(def("slow"), |_args: Value| async move {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!("too late"))
    });
    let dispatcher = ToolDispatcher::new(
        Arc::new(registry),
        DispatcherConfig {
            max_concurrency: 4,
            call_timeout: Duration::from_secs(5),
        },
    );

    let results = dispatcher
        .dispatch(vec![
            ToolCallRequest::new("slow", "slow", json!({})),
            ToolCallRequest::new("fast", "echo", json!({})),
        ])
        .await;

    assert_eq!(results.len(), 2);
    assert!(!by_id(&results, "fast").is_error);
    let error = payload(by_id(&results, "slow"));
    assert_eq!(error["error_type"], "timeout");
}

#[tokio::test]
async fn test_calls_run_concurrently() {
    // Each call waits until all three are running; serial execution would deadlock
    let barrier = Arc::new(Barrier::new(3));
    let gate = Arc::clone(&barrier);
    let registry = ToolRegistry::new().register(def("rendezvous"), move |_args: Value| {
        let gate = Arc::clone(&gate);
        async move {
            gate.wait().await;
            Ok(json!("met"))
        }
    });

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        dispatcher(registry).dispatch(
            (0..3)
                .map(|i| ToolCallRequest::new(i.to_string(), "rendezvous", json!({})))
                .collect(),
        ),
    )
    .await
    .expect("tool calls were serialized");

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.content == "met"));
}

#[tokio::test]
async fn test_results_arrive_in_completion_order() {
    let registry = ToolRegistry::new().register(def("sleep"), |args: Value| async move {
        let ms = args["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(ms))
    });
    let results = dispatcher(registry)
        .dispatch(vec![
            ToolCallRequest::new("slow", "sleep", json!({"ms": 300})),
            ToolCallRequest::new("quick", "sleep", json!({"ms": 1})),
        ])
        .await;

    let order: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(order, vec!["quick", "slow"]);
}

#[tokio::test]
async fn test_dispatch_response_requires_tool_call_list() {
    let dispatcher = dispatcher(weather_registry());
    let err = dispatcher
        .dispatch_response(&ModelResponse::text("no tools here"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no tool-call list"));

    let results = dispatcher
        .dispatch_response(&ModelResponse::with_tool_calls(vec![ToolCallRequest::new(
            "1",
            "echo",
            json!({}),
        )]))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[derive(Default)]
struct RecordingSink {
    persisted: Mutex<Vec<String>>,
}

#[async_trait]
impl ToolCallSink for RecordingSink {
    fn should_persist(&self, request: &ToolCallRequest) -> bool {
        request.function_name != "get_weather_data"
    }

    async fn persist(&self, request: &ToolCallRequest, _result: &ToolCallResult) -> Result<()> {
        self.persisted.lock().unwrap().push(request.call_id.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_sink_receives_only_selected_successful_calls() {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = dispatcher(weather_registry()).with_sink(sink.clone());

    dispatcher
        .dispatch(vec![
            ToolCallRequest::new("1", "echo", json!({})),
            ToolCallRequest::new("2", "get_weather_data", json!({"location": "Kano"})),
            ToolCallRequest::new("3", "fail", json!({})),
        ])
        .await;

    assert_eq!(*sink.persisted.lock().unwrap(), vec!["1".to_string()]);
}

struct FailingSink;

#[async_trait]
impl ToolCallSink for FailingSink {
    fn should_persist(&self, _request: &ToolCallRequest) -> bool {
        true
    }

    async fn persist(&self, _request: &ToolCallRequest, _result: &ToolCallResult) -> Result<()> {
        anyhow::bail!("history store offline")
    }
}

#[tokio::test]
async fn test_persist_failure_does_not_change_result() {
    let dispatcher = dispatcher(weather_registry()).with_sink(Arc::new(FailingSink));
    let results = dispatcher
        .dispatch(vec![ToolCallRequest::new("1", "echo", json!({"k": "v"}))])
        .await;
    assert!(!results[0].is_error);
    assert_eq!(results[0].content, r#"{"k":"v"}"#);
}
