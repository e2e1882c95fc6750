//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mcp_upstream_events_total` (counter): connection lifecycle events by kind
//! - `mcp_upstream_connected` (gauge): 1=connected, 0=disconnected
//! - `mcp_circuit_transitions_total` (counter): breaker transitions by name, state
//! - `mcp_auth_attempts_total` (counter): fallback outcomes by method
//! - `mcp_events_published_total` (counter): bridge publishes by channel kind
//! - `mcp_stream_subscribers` (gauge): live streaming subscribers
//! - `mcp_http_requests_total` (counter): HTTP requests by route, status
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing when the exporter is off.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_event(kind: &'static str) {
    counter!("mcp_upstream_events_total", "kind" => kind).increment(1);
}

pub fn record_upstream_connected(connected: bool) {
    gauge!("mcp_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

pub fn record_circuit_transition(name: &str, state: &'static str) {
    counter!("mcp_circuit_transitions_total", "name" => name.to_string(), "state" => state)
        .increment(1);
}

pub fn record_auth_attempt(method: &'static str, outcome: &'static str) {
    counter!("mcp_auth_attempts_total", "method" => method, "outcome" => outcome).increment(1);
}

pub fn record_event_published(channel_kind: &'static str, delivered: usize) {
    counter!("mcp_events_published_total", "kind" => channel_kind).increment(1);
    counter!("mcp_events_delivered_total", "kind" => channel_kind).increment(delivered as u64);
}

pub fn set_stream_subscribers(count: usize) {
    gauge!("mcp_stream_subscribers").set(count as f64);
}

pub fn record_http_request(route: &'static str, status: u16) {
    counter!("mcp_http_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
}
