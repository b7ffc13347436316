//! Export archive downloads
//!
//! Archives are fetched with a plain GET of the task's download URL. Downloads
//! are retried with a quadratic delay: the wait before attempt `n` (1-based) is
//! `n² × unit`.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::exporter::config::{archive_backoff, ARCHIVE_BACKOFF_UNIT_MS, ARCHIVE_DOWNLOAD_ATTEMPTS};

use super::{ServiceError, ServiceResult};

/// Source of export archives
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Fetch the archive at `url` in full
    async fn fetch(&self, url: &str) -> ServiceResult<Bytes>;
}

/// Archive fetcher backed by HTTP GET
pub struct HttpArchiveFetcher {
    client: Arc<Client>,
}

impl HttpArchiveFetcher {
    /// Create a fetcher using a shared HTTP client
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArchiveFetcher for HttpArchiveFetcher {
    async fn fetch(&self, url: &str) -> ServiceResult<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::ArchiveError(format!(
                "archive download failed: HTTP {}",
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| ServiceError::NetworkError(e.to_string()))
    }
}

/// Retry policy for archive downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadRetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Base delay multiplied by the squared attempt number
    pub backoff_unit: Duration,
}

impl Default for DownloadRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: ARCHIVE_DOWNLOAD_ATTEMPTS,
            backoff_unit: Duration::from_millis(ARCHIVE_BACKOFF_UNIT_MS),
        }
    }
}

impl DownloadRetryPolicy {
    /// Delay before the 1-based `attempt`
    pub fn delay_before(&self, attempt: u32) -> Duration {
        archive_backoff(attempt, self.backoff_unit)
    }
}

/// Download `url`, retrying every failure until the policy is exhausted
///
/// # Errors
/// Returns the last error once every attempt failed
pub async fn download_with_retry(
    fetcher: &dyn ArchiveFetcher,
    url: &str,
    policy: &DownloadRetryPolicy,
) -> ServiceResult<Bytes> {
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            debug!(attempt, "Waiting {:?} before archive download", delay);
            tokio::time::sleep(delay).await;
        }

        let started = Instant::now();
        match fetcher.fetch(url).await {
            Ok(bytes) => {
                crate::metrics::ExportMetrics::record_archive_download(
                    "success",
                    attempt,
                    bytes.len(),
                    started.elapsed(),
                );
                debug!(attempt, bytes = bytes.len(), "Archive downloaded");
                return Ok(bytes);
            }
            Err(e) => {
                warn!("Archive download attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = Some(e);
            }
        }
    }

    crate::metrics::ExportMetrics::record_archive_download("failure", attempts, 0, Duration::ZERO);
    Err(last_error.unwrap_or_else(|| {
        ServiceError::ArchiveError("archive download attempts exhausted".to_string())
    }))
}
