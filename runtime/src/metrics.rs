//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the engine components:
//! - Incremental updates (per operation)
//! - Reconciliation (sync and batch runs)
//! - Broadcast fan-out
//!
//! # Example
//!
//! ```rust,no_run
//! use exam_metrics_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // ... run a batch ...
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

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

/// Prometheus metrics recorder.
///
/// Installs the global recorder and renders the exposition text on demand.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address reported in logs for scrapers (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the metrics exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Incremental updates
    describe_counter!(
        "exam_metrics_incremental_updates_total",
        "Incremental updates applied, labelled by operation"
    );
    describe_counter!(
        "exam_metrics_incremental_update_errors_total",
        "Incremental updates that failed, labelled by operation and error kind"
    );

    // Reconciliation
    describe_counter!(
        "exam_metrics_syncs_total",
        "Full recomputations written"
    );
    describe_counter!(
        "exam_metrics_sync_errors_total",
        "Full recomputations that failed, labelled by error kind"
    );
    describe_histogram!(
        "exam_metrics_sync_duration_seconds",
        "Time taken to recompute and write one aggregate"
    );
    describe_counter!(
        "exam_metrics_initializations_total",
        "Aggregates created by initialize"
    );

    // Broadcast
    describe_counter!(
        "exam_metrics_broadcasts_published_total",
        "Envelopes handed to topic channels"
    );
    describe_counter!(
        "exam_metrics_broadcasts_dropped_total",
        "Publish calls discarded, labelled by reason"
    );
}

/// Incremental updater metrics recorder.
pub struct UpdateMetrics;

impl UpdateMetrics {
    /// Record an applied delta.
    pub fn record_update(operation: &'static str) {
        counter!("exam_metrics_incremental_updates_total", "operation" => operation).increment(1);
    }

    /// Record a failed delta.
    pub fn record_error(operation: &'static str, kind: &'static str) {
        counter!(
            "exam_metrics_incremental_update_errors_total",
            "operation" => operation,
            "kind" => kind
        )
        .increment(1);
    }
}

/// Reconciler metrics recorder.
pub struct SyncMetrics;

impl SyncMetrics {
    /// Record a successful sync.
    pub fn record_sync(duration: Duration) {
        counter!("exam_metrics_syncs_total").increment(1);
        histogram!("exam_metrics_sync_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed sync.
    pub fn record_error(kind: &'static str) {
        counter!("exam_metrics_sync_errors_total", "kind" => kind).increment(1);
    }

    /// Record an aggregate created by initialize.
    pub fn record_initialization() {
        counter!("exam_metrics_initializations_total").increment(1);
    }
}

/// Broadcast metrics recorder.
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    /// Record envelopes handed to topic channels.
    pub fn record_published(count: usize) {
        counter!("exam_metrics_broadcasts_published_total").increment(count as u64);
    }

    /// Record a discarded publish call.
    pub fn record_dropped(reason: &'static str) {
        counter!("exam_metrics_broadcasts_dropped_total", "reason" => reason).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[test]
    fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        UpdateMetrics::record_update("record_presence");
        SyncMetrics::record_sync(Duration::from_millis(20));
        BroadcastMetrics::record_dropped("queue_full");

        // If another test installed the recorder first, handle is None.
        // Metrics are still recorded globally.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("exam_metrics_incremental_updates_total"));
            assert!(rendered.contains("exam_metrics_syncs_total"));
            assert!(rendered.contains("exam_metrics_broadcasts_dropped_total"));
        }
    }
}
