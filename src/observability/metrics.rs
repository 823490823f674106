//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sxg_sign_requests_total` (counter): sign outcomes by `outcome`
//! - `sxg_sign_duration_seconds` (histogram): end-to-end signing latency
//! - `sxg_ocsp_refresh_total` (counter): OCSP refreshes by `result`
//! - `sxg_certificate_healthy` (gauge): 1=healthy, 0=unhealthy
//! - `sxg_rtv_refresh_total` (counter): runtime version refreshes by `result`
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op
//! - Labels are low-cardinality (no URLs)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_sign(outcome: &'static str, start: Instant) {
    counter!("sxg_sign_requests_total", "outcome" => outcome).increment(1);
    histogram!("sxg_sign_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_ocsp_refresh(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("sxg_ocsp_refresh_total", "result" => result).increment(1);
}

pub fn record_certificate_health(healthy: bool) {
    gauge!("sxg_certificate_healthy").set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_rtv_refresh(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("sxg_rtv_refresh_total", "result" => result).increment(1);
}
