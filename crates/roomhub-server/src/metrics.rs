//! Metrics collection and export for roomhub.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "roomhub_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "roomhub_connections_active";
    pub const MESSAGES_TOTAL: &str = "roomhub_messages_total";
    pub const MESSAGES_BYTES: &str = "roomhub_messages_bytes";
    pub const ROOMS_ACTIVE: &str = "roomhub_rooms";
    pub const EVICTIONS_TOTAL: &str = "roomhub_evictions_total";
    pub const LATENCY_SECONDS: &str = "roomhub_dispatch_latency_seconds";
    pub const ERRORS_TOTAL: &str = "roomhub_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open sessions"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections evicted because their outbound queue was full"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound message dispatch latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(%addr, "Metrics server listening");
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record dispatch latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record evicted connections.
pub fn record_evictions(count: usize) {
    if count > 0 {
        counter!(names::EVICTIONS_TOTAL).increment(count as u64);
    }
}

/// Update the room count.
pub fn set_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
