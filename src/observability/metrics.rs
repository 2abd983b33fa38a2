//! Metrics collection and exposition.
//!
//! # Metrics
//! - `diode_requests_total` (counter): engine responses by route, status
//! - `diode_request_duration_seconds` (histogram): end-to-end latency by route
//! - `diode_cache_events_total` (counter): cache lookups by result (hit/miss)
//! - `diode_rejections_total` (counter): requests refused before the origin, by reason
//! - `diode_origin_failures_total` (counter): transport failures by route
//! - `diode_monitor_probes_total` (counter): monitor probes by monitor, outcome

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, start: Instant) {
    counter!(
        "diode_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("diode_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache(result: &'static str) {
    counter!("diode_cache_events_total", "result" => result).increment(1);
}

pub fn record_rejection(reason: &'static str) {
    counter!("diode_rejections_total", "reason" => reason).increment(1);
}

pub fn record_origin_failure(route: &str) {
    counter!("diode_origin_failures_total", "route" => route.to_string()).increment(1);
}

pub fn record_probe(monitor: &str, ok: bool) {
    let outcome = if ok { "response" } else { "unreachable" };
    counter!(
        "diode_monitor_probes_total",
        "monitor" => monitor.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
