//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tenvis_huddle_core::ChatHub;
use tokio::task::JoinHandle;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const USERS_ONLINE: &str = "huddle_users_online";
    pub const FRAMES_TOTAL: &str = "huddle_frames_total";
    pub const FRAMES_BYTES: &str = "huddle_frames_bytes";
    pub const MESSAGES_PERSISTED_TOTAL: &str = "huddle_messages_persisted_total";
    pub const DELIVERIES_DROPPED_TOTAL: &str = "huddle_deliveries_dropped_total";
    pub const LATENCY_SECONDS: &str = "huddle_latency_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_gauge!(
        names::USERS_ONLINE,
        "Current number of users with at least one connection"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(
        names::MESSAGES_PERSISTED_TOTAL,
        "Total number of chat messages persisted"
    );
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED_TOTAL,
        "Frames dropped because a connection's outbound queue was full"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Periodically mirror hub statistics into gauges.
pub fn spawn_hub_reporter(hub: Arc<ChatHub>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let stats = hub.stats();
            gauge!(names::USERS_ONLINE).set(stats.online_users as f64);
            counter!(names::DELIVERIES_DROPPED_TOTAL).absolute(stats.dropped_total);
        }
    })
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
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a persisted chat message.
pub fn record_message_persisted() {
    counter!(names::MESSAGES_PERSISTED_TOTAL).increment(1);
}

/// Record frame processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
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

#[cfg(test)]
mod tests {
    use super::*;
    use tenvis_huddle_core::{HubConfig, MemoryStore};

    #[test]
    fn test_recorders_without_exporter() {
        let _guard = ConnectionMetricsGuard::new();
        record_frame(42, "inbound");
        record_message_persisted();
        record_error("decode");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hub_reporter_runs_until_aborted() {
        let hub = Arc::new(ChatHub::with_backend(
            HubConfig::default(),
            Arc::new(MemoryStore::new()),
        ));
        let reporter = spawn_hub_reporter(hub, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(!reporter.is_finished());

        reporter.abort();
        assert!(reporter.await.unwrap_err().is_cancelled());
    }
}
