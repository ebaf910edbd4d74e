// ABOUTME: Prometheus metrics for dispatches, tool calls and turns.
// ABOUTME: Thin wrappers over the metrics macros so label names stay consistent.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::dispatch::Operation;

/// Install the global Prometheus recorder. Call once per process.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// Count one router dispatch; `outcome` is "delivered" or an error tag
pub fn record_dispatch(platform: &str, operation: Operation, outcome: &str) {
    ::metrics::counter!(
        "maria_dispatch_total",
        "platform" => platform.to_string(),
        "operation" => operation.as_str(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_tool_call(function: &str, outcome: &'static str) {
    ::metrics::counter!(
        "maria_tool_calls_total",
        "function" => function.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_turn(outcome: &'static str) {
    ::metrics::counter!("maria_turns_total", "outcome" => outcome).increment(1);
}

/// Count one webhook request by result ("accepted", "auth_failed", "bad_request")
pub fn record_webhook_request(outcome: &'static str) {
    ::metrics::counter!("maria_webhook_requests_total", "outcome" => outcome).increment(1);
}
