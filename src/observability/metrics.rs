//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway and registration metrics
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, upstream
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_registry_refresh_total` (counter): refreshes by service, outcome
//! - `gateway_upstream_instances` (gauge): cached instances per service
//! - `gateway_snapshot_stale` (gauge): 1 while a service is served from stale data
//! - `service_registration_transitions_total` (counter): lifecycle transitions by state
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels for method, status code, upstream service

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished gateway request.
pub fn record_request(method: &str, status: u16, upstream: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "upstream" => upstream.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "upstream" => upstream.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record one registry refresh of `service`.
pub fn record_registry_refresh(service: &str, outcome: &'static str) {
    counter!(
        "gateway_registry_refresh_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record the cached instance count of `service` and whether it is stale.
pub fn record_upstream_instances(service: &str, count: usize, stale: bool) {
    gauge!("gateway_upstream_instances", "service" => service.to_string()).set(count as f64);
    gauge!("gateway_snapshot_stale", "service" => service.to_string()).set(if stale { 1.0 } else { 0.0 });
}

/// Record a registration lifecycle transition.
pub fn record_registration_state(state: &'static str) {
    counter!("service_registration_transitions_total", "state" => state).increment(1);
}
