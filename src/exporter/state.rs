//! Per-agent export state and the continuation rule

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::manifest::CoveredRange;

/// State of an agent in the active set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentExportState {
    /// Agent identifier
    pub agent_id: String,
    /// Start of the current window; never decreases
    pub next_start: DateTime<Utc>,
    /// End of the agent's interval, fixed at admission
    pub final_end: DateTime<Utc>,
    /// Export task currently tracked for this agent
    pub export_id: String,
    /// Windows submitted so far, including the current one
    pub windows_submitted: u32,
    /// Consecutive polls with an unrecognized or missing status
    #[serde(skip)]
    pub unknown_polls: u32,
}

/// Terminal result of one export window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// The archive was extracted and covered `range`
    Succeeded(CoveredRange),
    /// The task failed; the requested end is known when the service reported it
    Failed {
        /// Requested end of the failed window
        requested_end: Option<DateTime<Utc>>,
    },
}

/// What happens to an agent after a terminal outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Submit the next window starting at the updated `next_start`
    Continue,
    /// Leave the active set for good
    Retire(RetireReason),
}

/// Why an agent left the active set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RetireReason {
    /// The whole interval was exported
    Completed,
    /// The export covered nothing, so no later window can make progress
    NoProgress,
    /// The remote task failed
    TaskFailed,
    /// The task status stayed unrecognized or missing for too long
    UnknownStatus,
    /// The result archive could not be retrieved
    ArchiveUnavailable,
}

impl RetireReason {
    /// Whether the agent ended without reaching its final end
    pub fn is_failure(&self) -> bool {
        !matches!(self, RetireReason::Completed | RetireReason::NoProgress)
    }

    /// Short label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RetireReason::Completed => "completed",
            RetireReason::NoProgress => "no_progress",
            RetireReason::TaskFailed => "task_failed",
            RetireReason::UnknownStatus => "unknown_status",
            RetireReason::ArchiveUnavailable => "archive_unavailable",
        }
    }
}

impl fmt::Display for RetireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AgentExportState {
    /// Create state for a freshly submitted first window
    pub fn new(
        agent_id: impl Into<String>,
        next_start: DateTime<Utc>,
        final_end: DateTime<Utc>,
        export_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            next_start,
            final_end,
            export_id: export_id.into(),
            windows_submitted: 1,
            unknown_polls: 0,
        }
    }

    /// Whether more of the interval remains to be exported
    pub fn has_remaining(&self) -> bool {
        self.next_start < self.final_end
    }

    /// Apply a terminal outcome and decide whether the agent continues.
    ///
    /// `next_start` moves to the covered end (or the requested end of a failed
    /// window) but never backwards.
    pub fn advance(&mut self, outcome: &TerminalOutcome) -> Continuation {
        self.unknown_polls = 0;
        match outcome {
            TerminalOutcome::Failed { requested_end } => {
                if let Some(end) = requested_end {
                    self.next_start = self.next_start.max(*end);
                }
                Continuation::Retire(RetireReason::TaskFailed)
            }
            TerminalOutcome::Succeeded(range) => {
                let window_start = self.next_start;
                if range.end > window_start {
                    self.next_start = range.end;
                }

                if range.is_empty() || range.end <= window_start {
                    Continuation::Retire(RetireReason::NoProgress)
                } else if !self.has_remaining() {
                    Continuation::Retire(RetireReason::Completed)
                } else {
                    Continuation::Continue
                }
            }
        }
    }
}
