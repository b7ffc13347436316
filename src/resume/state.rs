//! Persisted scheduler state
//!
//! The state file records every agent with an outstanding export task, every
//! agent waiting to continue, and every agent already retired. Writes are
//! atomic (temp file + rename) and the file carries a schema version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::exporter::AgentExportState;

/// Current resume state schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed state file size (10 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Resume errors
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Another run holds the lock
    #[error("lock error: {0}")]
    LockError(String),

    /// Unsupported schema version
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Supported version
        expected: String,
        /// Version in the file
        found: String,
    },

    /// State file exceeds [`MAX_STATE_FILE_SIZE`]
    #[error("state file too large: {size} bytes (max {max})")]
    StateTooLarge {
        /// Actual size
        size: u64,
        /// Limit
        max: u64,
    },
}

/// An agent between windows, waiting for a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWindow {
    /// Start of the next window
    pub next_start: DateTime<Utc>,
    /// End of the agent's interval
    pub final_end: DateTime<Utc>,
    /// Windows already submitted
    pub windows_submitted: u32,
}

/// Scheduler state persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeState {
    schema_version: String,
    #[serde(default)]
    active: BTreeMap<String, AgentExportState>,
    #[serde(default)]
    pending: BTreeMap<String, PendingWindow>,
    #[serde(default)]
    retired: BTreeSet<String>,
    created_at: i64,
    updated_at: i64,
}

impl Default for ResumeState {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumeState {
    /// Create an empty state
    pub fn new() -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            active: BTreeMap::new(),
            pending: BTreeMap::new(),
            retired: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Agents with an outstanding export task
    pub fn active(&self) -> &BTreeMap<String, AgentExportState> {
        &self.active
    }

    /// Agents waiting for their next window
    pub fn pending(&self) -> &BTreeMap<String, PendingWindow> {
        &self.pending
    }

    /// Agents that finished
    pub fn retired(&self) -> &BTreeSet<String> {
        &self.retired
    }

    /// Whether `agent_id` finished in an earlier run
    pub fn is_retired(&self, agent_id: &str) -> bool {
        self.retired.contains(agent_id)
    }

    /// Whether the state holds nothing
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty() && self.retired.is_empty()
    }

    /// Replace the active and pending agents
    pub fn set_in_flight(
        &mut self,
        active: BTreeMap<String, AgentExportState>,
        pending: BTreeMap<String, PendingWindow>,
    ) {
        self.active = active;
        self.pending = pending;
        self.touch();
    }

    /// Record a retired agent
    pub fn mark_retired(&mut self, agent_id: &str) {
        self.active.remove(agent_id);
        self.pending.remove(agent_id);
        self.retired.insert(agent_id.to_string());
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp_millis();
    }

    /// Validate schema version (accepts current version only)
    pub fn validate_schema_version(&self) -> Result<(), ResumeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }

    /// Save state to `path` atomically
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        debug!(
            path = %path.display(),
            active = self.active.len(),
            pending = self.pending.len(),
            retired = self.retired.len(),
            "Saving resume state"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let parent_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;

        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

        Ok(())
    }

    /// Load state from `path`
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        debug!(path = %path.display(), "Loading resume state");

        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(ResumeError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        let state: ResumeState = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "Failed to deserialize resume state");
            ResumeError::DeserializationError(e.to_string())
        })?;
        state.validate_schema_version()?;

        info!(
            active = state.active.len(),
            pending = state.pending.len(),
            retired = state.retired.len(),
            "Resume state loaded"
        );
        Ok(state)
    }
}
