//! Export scheduling, polling and result extraction

pub mod config;
pub mod extractor;
pub mod poller;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod state;

pub use config::{ArchiveFailurePolicy, SchedulerConfig};
pub use extractor::{category_of, Extraction, ResultExtractor};
pub use poller::{PollOutcome, Poller};
pub use progress::{RunProgress, RunSummary};
pub use queue::{AdmissionQueue, AgentSelector, QueuedAgent};
pub use scheduler::ExportScheduler;
pub use state::{AgentExportState, Continuation, RetireReason, TerminalOutcome};

use crate::manifest::ManifestError;
use crate::output::OutputError;
use crate::resume::ResumeError;
use crate::service::ServiceError;

/// Export run errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Remote service error that cannot be recovered locally
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// The archive could not be downloaded
    #[error("archive unavailable after {attempts} attempts for agent {agent_id}: {reason}")]
    ArchiveUnavailable {
        /// Agent whose archive failed
        agent_id: String,
        /// Attempts made
        attempts: u32,
        /// Last download error
        reason: String,
    },

    /// The archive was downloaded but is unusable
    #[error("invalid archive for agent {agent_id}: {reason}")]
    InvalidArchive {
        /// Agent whose archive is invalid
        agent_id: String,
        /// What was wrong with it
        reason: String,
    },

    /// The manifest could not be read
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// A staged file could not be written
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Scheduler state could not be checkpointed
    #[error("resume error: {0}")]
    Resume(#[from] ResumeError),

    /// The run stopped because shutdown was requested
    #[error("export run interrupted by shutdown request")]
    Interrupted,
}

impl ExportError {
    /// Errors governed by the archive failure policy
    pub fn is_archive_failure(&self) -> bool {
        matches!(
            self,
            ExportError::ArchiveUnavailable { .. }
                | ExportError::InvalidArchive { .. }
                | ExportError::Manifest(_)
        )
    }
}

/// Result type for export operations
pub type ExportResult<T> = Result<T, ExportError>;
