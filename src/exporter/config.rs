//! Export scheduling configuration constants

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::service::archive::DownloadRetryPolicy;

/// Maximum number of export tasks the service allows to run at once.
/// Submissions beyond this are rejected by the service itself, so the scheduler
/// never holds more than this many agents in its active set.
pub const MAX_CONCURRENT_EXPORTS: usize = 5;

/// Pause after a concurrency-limit rejection before the next admission attempt (seconds)
pub const CONCURRENCY_COOLDOWN_SECS: u64 = 8;

/// Delay between poll cycles (seconds)
pub const POLL_INTERVAL_SECS: u64 = 2;

/// Attempts made to download a result archive before giving up
pub const ARCHIVE_DOWNLOAD_ATTEMPTS: u32 = 5;

/// Unit of the quadratic archive backoff in milliseconds.
/// Attempt `n` waits `(n - 1)² × unit`, so five attempts wait 30 seconds in total.
pub const ARCHIVE_BACKOFF_UNIT_MS: u64 = 1000;

/// Consecutive polls with an unrecognized or missing status before an agent is
/// retired as failed
pub const MAX_UNKNOWN_POLLS: u32 = 10;

/// Maximum number of retries for transient service errors (max total wait ~1 minute)
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Calculate exponential backoff delay for service retries
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(retry_count));
    let delay_ms = delay_ms.min(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}

/// Calculate the quadratic delay before the 1-based archive download `attempt`
///
/// The first attempt is immediate.
pub fn archive_backoff(attempt: u32, unit: Duration) -> Duration {
    let retry = attempt.saturating_sub(1);
    unit.saturating_mul(retry.saturating_mul(retry))
}

/// What to do when a result archive cannot be retrieved or unpacked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFailurePolicy {
    /// Stop the whole run with an error
    #[default]
    AbortRun,
    /// Retire the affected agent and keep going
    RetireAgent,
}

impl fmt::Display for ArchiveFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFailurePolicy::AbortRun => write!(f, "abort"),
            ArchiveFailurePolicy::RetireAgent => write!(f, "retire-agent"),
        }
    }
}

impl FromStr for ArchiveFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(ArchiveFailurePolicy::AbortRun),
            "retire-agent" => Ok(ArchiveFailurePolicy::RetireAgent),
            other => Err(format!(
                "unknown archive failure policy '{}' (expected 'abort' or 'retire-agent')",
                other
            )),
        }
    }
}

/// Runtime configuration of the export scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum size of the active set
    pub max_concurrent: usize,
    /// Pause after a concurrency-limit rejection
    pub cooldown: Duration,
    /// Pause between poll cycles
    pub poll_interval: Duration,
    /// Consecutive unknown polls tolerated per agent
    pub max_unknown_polls: u32,
    /// Archive download retry policy
    pub download_retry: DownloadRetryPolicy,
    /// Reaction to unretrievable archives
    pub archive_failure_policy: ArchiveFailurePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: MAX_CONCURRENT_EXPORTS,
            cooldown: Duration::from_secs(CONCURRENCY_COOLDOWN_SECS),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            max_unknown_polls: MAX_UNKNOWN_POLLS,
            download_retry: DownloadRetryPolicy::default(),
            archive_failure_policy: ArchiveFailurePolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Set the active set capacity (clamped to at least one)
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Set the concurrency-limit cooldown
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set the delay between poll cycles
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the unknown-status tolerance
    pub fn with_max_unknown_polls(mut self, max_unknown_polls: u32) -> Self {
        self.max_unknown_polls = max_unknown_polls.max(1);
        self
    }

    /// Set the archive download retry policy
    pub fn with_download_retry(mut self, download_retry: DownloadRetryPolicy) -> Self {
        self.download_retry = download_retry;
        self
    }

    /// Set the archive failure policy
    pub fn with_archive_failure_policy(mut self, policy: ArchiveFailurePolicy) -> Self {
        self.archive_failure_policy = policy;
        self
    }
}
