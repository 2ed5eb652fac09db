//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_forwarded_calls_total` (counter): forwarded calls by method, outcome
//! - `bridge_forward_duration_seconds` (histogram): backend round-trip latency
//! - `bridge_active_sessions` (gauge): open downstream sessions
//! - `bridge_backend_up` (gauge): 1 while the backend is ready, 0 otherwise
//! - `bridge_backend_launches_total` (counter): backend processes spawned

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one forwarded call.
pub fn record_forward(method: &str, outcome: &'static str, started: Instant) {
    metrics::counter!(
        "bridge_forwarded_calls_total",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("bridge_forward_duration_seconds", "method" => method.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn set_active_sessions(count: usize) {
    metrics::gauge!("bridge_active_sessions").set(count as f64);
}

pub fn record_backend_up(up: bool) {
    metrics::gauge!("bridge_backend_up").set(if up { 1.0 } else { 0.0 });
}

pub fn record_launch() {
    metrics::counter!("bridge_backend_launches_total").increment(1);
}
