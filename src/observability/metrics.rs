//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, rejections, breaker and health state)
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, endpoint
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_rate_limited_total` (counter): rejections by scope
//! - `gateway_store_errors_total` (counter): store failures absorbed by fail-open
//! - `gateway_circuit_transitions_total` (counter): breaker transitions by service, state
//! - `gateway_health_probe_duration_seconds` (histogram): probe latency by status
//! - `gateway_instance_health` (gauge): 1=healthy, 0.5=degraded, 0=unhealthy
//!
//! Recording without an installed recorder is a no-op, so tests need no setup.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::state::HealthStatus;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one proxied request.
pub fn record_request(method: &str, status: u16, endpoint: &str, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    let endpoint = endpoint.to_string();
    counter!(
        "gateway_requests_total",
        "method" => method.clone(),
        "status" => status.clone(),
        "endpoint" => endpoint.clone()
    )
    .increment(1);
    histogram!(
        "gateway_request_duration_seconds",
        "method" => method,
        "status" => status,
        "endpoint" => endpoint
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("gateway_rate_limited_total", "scope" => scope).increment(1);
}

pub fn record_store_error(component: &'static str) {
    counter!("gateway_store_errors_total", "component" => component).increment(1);
}

pub fn record_circuit_transition(service: &str, to: &'static str) {
    counter!(
        "gateway_circuit_transitions_total",
        "service" => service.to_string(),
        "state" => to
    )
    .increment(1);
}

pub fn record_health_probe(instance: &str, status: HealthStatus, elapsed: Duration) {
    histogram!(
        "gateway_health_probe_duration_seconds",
        "instance" => instance.to_string(),
        "status" => status.as_str()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_instance_health(instance: &str, status: HealthStatus) {
    let value = match status {
        HealthStatus::Healthy => 1.0,
        HealthStatus::Degraded => 0.5,
        HealthStatus::Unhealthy => 0.0,
    };
    gauge!("gateway_instance_health", "instance" => instance.to_string()).set(value);
}
