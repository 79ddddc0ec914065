//! Prometheus metrics for request latency and collaborator health.
//!
//! This module provides metrics for:
//! - Handled request latency and counts
//! - Envelope decode/encode failures
//! - Handler panics
//! - Telemetry delivery
//! - Database ensure latency

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::{debug, info};

// === Metric Name Constants ===

/// HTTP request latency metric name.
pub const METRIC_HTTP_REQUEST_LATENCY: &str = "http_request_latency_ms";
/// HTTP requests counter metric name.
pub const METRIC_HTTP_REQUESTS: &str = "http_requests_total";
/// Envelope decode failures counter metric name.
pub const METRIC_ENVELOPE_DECODE_FAILURES: &str = "envelope_decode_failures_total";
/// Envelope encode failures counter metric name.
pub const METRIC_ENVELOPE_ENCODE_FAILURES: &str = "envelope_encode_failures_total";
/// Handler panics counter metric name.
pub const METRIC_HANDLER_PANICS: &str = "handler_panics_total";
/// Telemetry envelopes dropped counter metric name.
pub const METRIC_TELEMETRY_DROPPED: &str = "telemetry_dropped_total";
/// Telemetry batches sent counter metric name.
pub const METRIC_TELEMETRY_BATCHES_SENT: &str = "telemetry_batches_sent_total";
/// Telemetry batches failed counter metric name.
pub const METRIC_TELEMETRY_BATCHES_FAILED: &str = "telemetry_batches_failed_total";
/// Database ensure latency metric name.
pub const METRIC_DATABASE_ENSURE_LATENCY: &str = "database_ensure_latency_ms";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_HTTP_REQUEST_LATENCY,
        "Handled request latency in milliseconds"
    );
    describe_histogram!(
        METRIC_DATABASE_ENSURE_LATENCY,
        "Startup database ensure latency in milliseconds"
    );

    describe_counter!(METRIC_HTTP_REQUESTS, "Total number of handled requests");
    describe_counter!(
        METRIC_ENVELOPE_DECODE_FAILURES,
        "Total number of request bodies that failed to decode"
    );
    describe_counter!(
        METRIC_ENVELOPE_ENCODE_FAILURES,
        "Total number of response envelopes that failed to encode"
    );
    describe_counter!(METRIC_HANDLER_PANICS, "Total number of caught panics");
    describe_counter!(
        METRIC_TELEMETRY_DROPPED,
        "Total number of telemetry envelopes dropped on a full queue"
    );
    describe_counter!(
        METRIC_TELEMETRY_BATCHES_SENT,
        "Total number of telemetry batches accepted by ingestion"
    );
    describe_counter!(
        METRIC_TELEMETRY_BATCHES_FAILED,
        "Total number of telemetry batches that failed to send"
    );

    debug!("Metrics initialized");
}

/// Install the Prometheus recorder and serve it on the given address.
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Record one handled request.
pub fn record_http_request(start: Instant, route: &str, method: &str, status: u16) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    let status = status.to_string();
    histogram!(
        METRIC_HTTP_REQUEST_LATENCY,
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status.clone()
    )
    .record(latency_ms);
    counter!(
        METRIC_HTTP_REQUESTS,
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Increment envelope decode failures counter.
pub fn inc_envelope_decode_failures() {
    counter!(METRIC_ENVELOPE_DECODE_FAILURES).increment(1);
}

/// Increment envelope encode failures counter.
pub fn inc_envelope_encode_failures() {
    counter!(METRIC_ENVELOPE_ENCODE_FAILURES).increment(1);
}

/// Increment handler panics counter.
pub fn inc_handler_panics() {
    counter!(METRIC_HANDLER_PANICS).increment(1);
}

/// Increment dropped telemetry counter.
pub fn inc_telemetry_dropped() {
    counter!(METRIC_TELEMETRY_DROPPED).increment(1);
}

/// Record the outcome of one telemetry batch.
pub fn record_telemetry_batch(sent: bool) {
    if sent {
        counter!(METRIC_TELEMETRY_BATCHES_SENT).increment(1);
    } else {
        counter!(METRIC_TELEMETRY_BATCHES_FAILED).increment(1);
    }
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.metric_name).record(latency_ms);
    }
}

/// Create a latency timer for the startup database ensure.
pub fn timer_database_ensure() -> LatencyTimer {
    LatencyTimer::new(METRIC_DATABASE_ENSURE_LATENCY)
}
