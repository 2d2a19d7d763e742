//! Metrics collection and exposition.
//!
//! # Metrics
//! - `stream_guard_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `stream_guard_breaker_transitions_total` (counter): by breaker, target state
//! - `stream_guard_breaker_rejections_total` (counter): calls refused while open
//! - `stream_guard_retry_attempts_total` (counter): by operation, outcome
//! - `stream_guard_stream_state` (gauge): numeric connection state per stream
//! - `stream_guard_reconnects_total` (counter): reconnect cycles per stream
//! - `stream_guard_messages_total` (counter): data frames delivered per stream
//! - `stream_guard_heartbeats_total` (counter): ping / pong / timeout / idle_probe / stale
//!
//! # Design Decisions
//! - The `metrics` facade is a no-op until an exporter is installed
//! - Prometheus exporter is opt-in via `observability.metrics_enabled`

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_breaker_state(breaker: &str, state_code: u8) {
    gauge!("stream_guard_breaker_state", "breaker" => breaker.to_string()).set(state_code as f64);
}

pub fn record_breaker_transition(breaker: &str, to: &'static str) {
    counter!(
        "stream_guard_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "to" => to
    )
    .increment(1);
}

pub fn record_breaker_rejection(breaker: &str) {
    counter!("stream_guard_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_retry_attempt(operation: &str, outcome: &'static str) {
    counter!(
        "stream_guard_retry_attempts_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_stream_state(stream: &str, state_code: u8) {
    gauge!("stream_guard_stream_state", "stream" => stream.to_string()).set(state_code as f64);
}

pub fn record_reconnect(stream: &str) {
    counter!("stream_guard_reconnects_total", "stream" => stream.to_string()).increment(1);
}

pub fn record_message(stream: &str) {
    counter!("stream_guard_messages_total", "stream" => stream.to_string()).increment(1);
}

pub fn record_heartbeat(stream: &str, event: &'static str) {
    counter!(
        "stream_guard_heartbeats_total",
        "stream" => stream.to_string(),
        "event" => event
    )
    .increment(1);
}
