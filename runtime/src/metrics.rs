//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the booking runtime:
//! - Message bus publish/consume
//! - Malformed and ignored messages
//! - Reducer execution (recorded by the Store)
//! - Consumer reconnects
//!
//! # Example
//!
//! ```rust,no_run
//! use booking_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and serves the scrape endpoint on `addr`.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed (e.g. by another test) is tolerated.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                tokio::spawn(async move {
                    if exporter.await.is_err() {
                        tracing::error!("Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "bus_messages_published_total",
        "Total number of envelopes accepted by the broker"
    );
    describe_histogram!(
        "bus_publish_duration_seconds",
        "Time taken to publish an envelope, retries included"
    );
    describe_counter!(
        "bus_publish_errors_total",
        "Total number of publishes that failed after exhausting retries"
    );
    describe_counter!(
        "bus_messages_consumed_total",
        "Total number of envelopes handled by consumers"
    );
    describe_counter!(
        "bus_messages_dropped_total",
        "Total number of envelopes dropped by consumers (malformed or rejected)"
    );
    describe_counter!(
        "bus_consumer_reconnects_total",
        "Total number of consumer re-subscriptions after a lost stream"
    );
    describe_histogram!(
        "store_reducer_duration_seconds",
        "Time spent inside reducers"
    );
    describe_counter!(
        "store_effects_executed_total",
        "Total number of effects executed by the Store, labelled by type"
    );
}

/// Message bus metrics recorder.
pub struct BusMetrics;

impl BusMetrics {
    /// Record a successful publish.
    pub fn record_publish(duration: Duration) {
        counter!("bus_messages_published_total").increment(1);
        histogram!("bus_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a publish that gave up.
    pub fn record_publish_error() {
        counter!("bus_publish_errors_total").increment(1);
    }

    /// Record a handled delivery.
    pub fn record_consume(consumer: &str) {
        counter!("bus_messages_consumed_total", "consumer" => consumer.to_string()).increment(1);
    }

    /// Record a dropped delivery.
    pub fn record_drop(consumer: &str) {
        counter!("bus_messages_dropped_total", "consumer" => consumer.to_string()).increment(1);
    }

    /// Record a consumer re-subscription.
    pub fn record_reconnect(consumer: &str) {
        counter!("bus_consumer_reconnects_total", "consumer" => consumer.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        BusMetrics::record_publish(Duration::from_millis(5));
        BusMetrics::record_consume("agent");
        BusMetrics::record_drop("agent");

        // If another test installed the recorder first, rendering is unavailable
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("bus_messages_published_total"));
            assert!(rendered.contains("bus_messages_dropped_total"));
        }
    }
}
