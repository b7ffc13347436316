//! Export run metrics
//!
//! Metrics are recorded through the `metrics` facade and are no-ops until a
//! recorder is installed. [`init_metrics`] installs a Prometheus exporter with
//! its own scrape endpoint.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::exporter::RetireReason;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Metrics initialization errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The Prometheus exporter could not be installed
    #[error("failed to install Prometheus exporter on {addr}: {reason}")]
    Install {
        /// Requested listen address
        addr: SocketAddr,
        /// Underlying error
        reason: String,
    },
}

/// Initialize the Prometheus exporter on `addr`
///
/// Idempotent: later calls are ignored once an exporter is installed.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if METRICS_INITIALIZED.load(Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install {
            addr,
            reason: e.to_string(),
        })?;

    describe_counter!(
        "export_submissions_total",
        Unit::Count,
        "Export task submissions by outcome"
    );
    describe_counter!(
        "export_windows_completed_total",
        Unit::Count,
        "Export windows that reached a terminal status"
    );
    describe_counter!(
        "export_agents_retired_total",
        Unit::Count,
        "Agents retired from the active set by reason"
    );
    describe_counter!(
        "service_retries_total",
        Unit::Count,
        "Retries of discovery service calls"
    );
    describe_gauge!(
        "export_active_agents",
        Unit::Count,
        "Agents with an outstanding export task"
    );
    describe_gauge!(
        "export_queued_agents",
        Unit::Count,
        "Agents waiting in the admission queue"
    );
    describe_counter!(
        "archive_downloads_total",
        Unit::Count,
        "Archive downloads by outcome"
    );
    describe_histogram!(
        "archive_download_bytes",
        Unit::Bytes,
        "Size of downloaded archives"
    );
    describe_histogram!(
        "archive_download_duration_seconds",
        Unit::Seconds,
        "Duration of the successful archive download attempt"
    );

    METRICS_INITIALIZED.store(true, Ordering::SeqCst);
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Recording helpers for the export scheduler
pub struct ExportMetrics;

impl ExportMetrics {
    /// Count a submission by outcome (`accepted`, `duplicate`, `concurrency_limited`, `error`)
    pub fn record_submission(outcome: &'static str) {
        counter!("export_submissions_total", "outcome" => outcome).increment(1);
    }

    /// Count a window that reached a terminal status
    pub fn record_window_completed(status: &'static str) {
        counter!("export_windows_completed_total", "status" => status).increment(1);
    }

    /// Count a retired agent
    pub fn record_agent_retired(reason: RetireReason) {
        counter!("export_agents_retired_total", "reason" => reason.as_str()).increment(1);
    }

    /// Publish the current size of the active set and the queue
    pub fn set_scheduler_state(active: usize, queued: usize) {
        gauge!("export_active_agents").set(active as f64);
        gauge!("export_queued_agents").set(queued as f64);
    }

    /// Count a retried service call
    pub fn record_service_retry(operation: &str, backoff: Duration) {
        counter!("service_retries_total", "operation" => operation.to_string()).increment(1);
        debug!(
            operation,
            backoff_ms = backoff.as_millis() as u64,
            "Service retry recorded"
        );
    }

    /// Record an archive download
    pub fn record_archive_download(
        outcome: &'static str,
        attempts: u32,
        bytes: usize,
        duration: Duration,
    ) {
        counter!("archive_downloads_total", "outcome" => outcome).increment(1);
        if outcome == "success" {
            histogram!("archive_download_bytes").record(bytes as f64);
            histogram!("archive_download_duration_seconds").record(duration.as_secs_f64());
        }
        debug!(outcome, attempts, bytes, "Archive download recorded");
    }
}
