//! # Discovery Export Library
//!
//! Exports the collected data of every discovery agent registered with a remote
//! discovery service, one bounded time window at a time, while never holding
//! more than a fixed number of export tasks in flight.
//!
//! ## Features
//!
//! - **Window Planning**: Each agent's lifetime is clipped to optional global bounds
//!   and split into consecutive windows of at most three days
//! - **Bounded Concurrency**: At most five export tasks are active at once; the
//!   remote concurrency limit is handled by requeueing and cooling down
//! - **Duplicate Adoption**: Re-submitting an already exported window adopts the
//!   existing task instead of failing the run
//! - **Archive Staging**: Result archives are downloaded with quadratic retry,
//!   unpacked, and staged per agent and per category
//! - **Resume Capability**: In-flight exports and retired agents are checkpointed so
//!   an interrupted run picks up where it stopped
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use discovery_export::exporter::{ExportScheduler, SchedulerConfig};
//! use discovery_export::output::StagingLayout;
//! use discovery_export::service::archive::HttpArchiveFetcher;
//! use discovery_export::service::http::DiscoveryHttpClient;
//! use discovery_export::service::pagination::PaginationHelper;
//! use discovery_export::service::shared_resources::shared_http_client;
//! use discovery_export::window::WindowPlanner;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let http = shared_http_client()?;
//! let service = Arc::new(DiscoveryHttpClient::new(
//!     http.clone(),
//!     "http://127.0.0.1:8080",
//! ));
//! let agents = PaginationHelper::collect_agents(service.as_ref()).await?;
//!
//! let mut scheduler = ExportScheduler::new(
//!     service,
//!     Arc::new(HttpArchiveFetcher::new(http)),
//!     StagingLayout::new("./exports"),
//!     WindowPlanner::new(None, None),
//!     SchedulerConfig::default(),
//! );
//! scheduler.enqueue(agents);
//! let summary = scheduler.run().await?;
//! println!("{} windows exported", summary.windows_completed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`window`] - Time-window planning per agent
//! - [`manifest`] - Parsing of the `results` manifest found in every archive
//! - [`service`] - Remote discovery service contract, HTTP client and pagination
//! - [`exporter`] - Admission queue, scheduler, poller and result extraction
//! - [`output`] - Staging layout on the local filesystem
//! - [`resume`] - Checkpointing of scheduler state across runs

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// CLI command implementations
pub mod cli;

/// Export scheduling and result extraction
pub mod exporter;

/// Archive manifest parsing
pub mod manifest;

/// Prometheus metrics
pub mod metrics;

/// Staging of extracted files
pub mod output;

/// Resume capability for export runs
pub mod resume;

/// Remote discovery service client
pub mod service;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Export window planning
pub mod window;

pub use exporter::{ExportScheduler, SchedulerConfig};
pub use window::{ExportWindow, WindowPlan, WindowPlanner};

/// Timestamp format of agent registration and health-ping times (`2020-01-01T00:00:00Z`)
pub const AGENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Timestamp format used inside archive manifests (`2020-01-01 00:00:00`)
pub const MANIFEST_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Filename-safe timestamp used to prefix staged files (`2020-01-01T000000Z`)
pub const STAGED_PREFIX_FORMAT: &str = "%Y-%m-%dT%H%M%SZ";

/// Parse a naive timestamp in `format` as UTC.
pub fn parse_utc(input: &str, format: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(input.trim(), format).map(|naive| naive.and_utc())
}

/// A discovery agent registered with the remote service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    /// Opaque agent identifier
    pub agent_id: String,
    /// Free-form agent type reported by the service
    pub agent_type: String,
    /// When the agent first registered
    pub registered_time: DateTime<Utc>,
    /// When the agent last reported in
    pub last_health_ping_time: DateTime<Utc>,
}

impl Agent {
    /// Connectors collect no exportable data and are never scheduled
    pub fn is_connector(&self) -> bool {
        self.agent_type.to_ascii_lowercase().contains("connector")
    }

    /// Validate agent invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.agent_id.trim().is_empty() {
            return Err("agent_id must not be empty".to_string());
        }
        Ok(())
    }
}

/// Lifecycle status of a remote export task
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExportStatus {
    /// The task is still running
    InProgress,
    /// The task finished and an archive is available
    Succeeded,
    /// The task finished without producing data
    Failed,
    /// A status this client does not recognize
    Unknown(String),
}

impl ExportStatus {
    /// Parse a status string as reported by the service
    pub fn parse(raw: &str) -> Self {
        match raw {
            "IN_PROGRESS" => ExportStatus::InProgress,
            "SUCCEEDED" => ExportStatus::Succeeded,
            "FAILED" => ExportStatus::Failed,
            other => ExportStatus::Unknown(other.to_string()),
        }
    }

    /// Whether the task will not change status again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStatus::Succeeded | ExportStatus::Failed)
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportStatus::InProgress => write!(f, "IN_PROGRESS"),
            ExportStatus::Succeeded => write!(f, "SUCCEEDED"),
            ExportStatus::Failed => write!(f, "FAILED"),
            ExportStatus::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

/// Snapshot of a remote export task as returned by a status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTask {
    /// Export task identifier
    pub export_id: String,
    /// Current status
    pub status: ExportStatus,
    /// Human readable status detail, if any
    pub status_message: Option<String>,
    /// Archive location, present once the task succeeded
    pub download_url: Option<String>,
    /// Start of the window that was requested
    pub requested_start_time: Option<DateTime<Utc>>,
    /// End of the window that was requested
    pub requested_end_time: Option<DateTime<Utc>>,
}
