//! Run progress counters and the end-of-run summary.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::state::RetireReason;

/// Counters accumulated over one export run.
#[derive(Debug, Clone)]
pub struct RunProgress {
    started_at: Instant,
    total_agents: usize,
    admitted: usize,
    skipped: usize,
    windows_submitted: u64,
    windows_completed: u64,
    files_staged: u64,
    duplicates_adopted: u64,
    concurrency_rejections: u64,
    retired: BTreeMap<RetireReason, usize>,
}

impl Default for RunProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl RunProgress {
    /// Start counting.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_agents: 0,
            admitted: 0,
            skipped: 0,
            windows_submitted: 0,
            windows_completed: 0,
            files_staged: 0,
            duplicates_adopted: 0,
            concurrency_rejections: 0,
            retired: BTreeMap::new(),
        }
    }

    /// Register `count` agents entering the queue.
    pub fn add_agents(&mut self, count: usize) {
        self.total_agents += count;
    }

    /// An agent got its first slot in the active set; returns its 1-based ordinal.
    pub fn record_admitted(&mut self) -> usize {
        self.admitted += 1;
        self.admitted
    }

    /// An agent had nothing to export.
    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    /// A window was submitted (or adopted).
    pub fn record_window_submitted(&mut self) {
        self.windows_submitted += 1;
    }

    /// A window reached a terminal status.
    pub fn record_window_completed(&mut self, files_staged: usize) {
        self.windows_completed += 1;
        self.files_staged += files_staged as u64;
    }

    /// An existing export was adopted instead of a new submission.
    pub fn record_duplicate(&mut self) {
        self.duplicates_adopted += 1;
    }

    /// The service rejected a submission for exceeding its concurrency limit.
    pub fn record_concurrency_rejection(&mut self) {
        self.concurrency_rejections += 1;
    }

    /// An agent left the active set.
    pub fn record_retired(&mut self, reason: RetireReason) {
        *self.retired.entry(reason).or_default() += 1;
    }

    /// Agents registered for the run.
    pub fn total_agents(&self) -> usize {
        self.total_agents
    }

    /// Agents admitted so far.
    pub fn admitted(&self) -> usize {
        self.admitted
    }

    /// Agents retired for `reason`.
    pub fn retired_for(&self, reason: RetireReason) -> usize {
        self.retired.get(&reason).copied().unwrap_or(0)
    }

    /// Elapsed time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Short human-readable progress line.
    pub fn format_progress(&self, active: usize, queued: usize) -> String {
        let finished: usize = self.retired.values().sum::<usize>() + self.skipped;
        format!(
            "{}/{} agents finished, {} active, {} queued, {} windows exported",
            finished, self.total_agents, active, queued, self.windows_completed
        )
    }

    /// Snapshot the counters.
    pub fn summary(&self) -> RunSummary {
        let retired_failed: usize = self
            .retired
            .iter()
            .filter(|(reason, _)| reason.is_failure())
            .map(|(_, count)| *count)
            .sum();
        let retired_total: usize = self.retired.values().sum();

        RunSummary {
            total_agents: self.total_agents,
            agents_skipped: self.skipped,
            agents_completed: retired_total - retired_failed,
            agents_failed: retired_failed,
            windows_submitted: self.windows_submitted,
            windows_completed: self.windows_completed,
            files_staged: self.files_staged,
            duplicates_adopted: self.duplicates_adopted,
            concurrency_rejections: self.concurrency_rejections,
            retired_by_reason: self
                .retired
                .iter()
                .map(|(reason, count)| (reason.to_string(), *count))
                .collect(),
            elapsed_secs: self.elapsed().as_secs_f64(),
        }
    }
}

/// Final counters of an export run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    /// Agents registered for the run
    pub total_agents: usize,
    /// Agents with nothing to export
    pub agents_skipped: usize,
    /// Agents retired after exporting everything they could
    pub agents_completed: usize,
    /// Agents retired because of a failure
    pub agents_failed: usize,
    /// Windows submitted or adopted
    pub windows_submitted: u64,
    /// Windows that reached a terminal status
    pub windows_completed: u64,
    /// Data files staged
    pub files_staged: u64,
    /// Existing exports adopted
    pub duplicates_adopted: u64,
    /// Submissions rejected by the concurrency limit
    pub concurrency_rejections: u64,
    /// Retirements keyed by reason
    pub retired_by_reason: BTreeMap<String, usize>,
    /// Wall-clock duration of the run
    pub elapsed_secs: f64,
}
