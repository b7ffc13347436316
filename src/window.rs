//! Export window planning
//!
//! An agent's exportable interval runs from its registration to its last health
//! ping, clipped to the optional global bounds of the run. The interval is
//! covered by consecutive half-open windows of at most [`MAX_WINDOW_DAYS`].

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use crate::Agent;

/// Longest span a single export request may cover
pub const MAX_WINDOW_DAYS: i64 = 3;

/// A half-open `[start, end)` export window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportWindow {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl ExportWindow {
    /// Length of the window
    pub fn span(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for ExportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(crate::AGENT_TIME_FORMAT),
            self.end.format(crate::AGENT_TIME_FORMAT)
        )
    }
}

/// Result of planning an agent's exportable interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPlan {
    /// The agent has a non-empty interval to export
    Export {
        /// Start of the first window
        next_start: DateTime<Utc>,
        /// End of the whole interval
        final_end: DateTime<Utc>,
    },
    /// The clipped interval is empty
    NothingToExport {
        /// Clipped start
        start: DateTime<Utc>,
        /// Clipped end
        end: DateTime<Utc>,
    },
}

/// Plans export intervals and windows for agents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlanner {
    start_bound: Option<DateTime<Utc>>,
    end_bound: Option<DateTime<Utc>>,
    max_window: Duration,
}

impl WindowPlanner {
    /// Create a planner with optional global bounds
    pub fn new(start_bound: Option<DateTime<Utc>>, end_bound: Option<DateTime<Utc>>) -> Self {
        Self {
            start_bound,
            end_bound,
            max_window: Duration::days(MAX_WINDOW_DAYS),
        }
    }

    /// Override the maximum window length
    pub fn with_max_window(mut self, max_window: Duration) -> Self {
        self.max_window = max_window;
        self
    }

    /// Maximum window length
    pub fn max_window(&self) -> Duration {
        self.max_window
    }

    /// Global start bound, if any
    pub fn start_bound(&self) -> Option<DateTime<Utc>> {
        self.start_bound
    }

    /// Global end bound, if any
    pub fn end_bound(&self) -> Option<DateTime<Utc>> {
        self.end_bound
    }

    /// Clip the agent's lifetime to the global bounds
    pub fn plan(&self, agent: &Agent) -> WindowPlan {
        let start = match self.start_bound {
            Some(bound) => agent.registered_time.max(bound),
            None => agent.registered_time,
        };
        let end = match self.end_bound {
            Some(bound) => agent.last_health_ping_time.min(bound),
            None => agent.last_health_ping_time,
        };

        if start < end {
            WindowPlan::Export {
                next_start: start,
                final_end: end,
            }
        } else {
            WindowPlan::NothingToExport { start, end }
        }
    }

    /// The window that starts at `next_start`, capped by `final_end`
    pub fn window_from(&self, next_start: DateTime<Utc>, final_end: DateTime<Utc>) -> ExportWindow {
        let end = (next_start + self.max_window).min(final_end);
        ExportWindow {
            start: next_start,
            end,
        }
    }

    /// Number of windows needed to cover `[next_start, final_end)` if every
    /// window is fully covered
    pub fn window_count(&self, next_start: DateTime<Utc>, final_end: DateTime<Utc>) -> u64 {
        if next_start >= final_end || self.max_window <= Duration::zero() {
            return 0;
        }
        let total = (final_end - next_start).num_seconds().max(1) as u64;
        let step = self.max_window.num_seconds().max(1) as u64;
        total.div_ceil(step)
    }
}
