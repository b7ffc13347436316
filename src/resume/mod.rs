//! Resume capability for export runs
//!
//! A [`ResumeStore`] owns a resume directory for the duration of a run: it
//! holds the run lock, restores in-flight agents on startup, and checkpoints
//! the scheduler after every cycle that changed something.

pub mod lock;
pub mod state;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub use lock::RunLock;
pub use state::{PendingWindow, ResumeError, ResumeState};

use crate::exporter::{AdmissionQueue, AgentExportState, QueuedAgent};

/// Name of the state file inside the resume directory
pub const STATE_FILE_NAME: &str = "export_state.json";

/// Resume directory opened by one run
pub struct ResumeStore {
    path: PathBuf,
    state: ResumeState,
    _lock: RunLock,
}

impl ResumeStore {
    /// Lock `dir` and load its state, starting fresh when none exists
    pub fn open(dir: &Path) -> Result<Self, ResumeError> {
        let lock = RunLock::try_acquire(dir)?;
        let path = dir.join(STATE_FILE_NAME);

        let state = if path.exists() {
            let state = ResumeState::load(&path)?;
            info!(
                path = %path.display(),
                active = state.active().len(),
                pending = state.pending().len(),
                retired = state.retired().len(),
                "Resuming previous export run"
            );
            state
        } else {
            ResumeState::new()
        };

        Ok(Self {
            path,
            state,
            _lock: lock,
        })
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loaded state
    pub fn state(&self) -> &ResumeState {
        &self.state
    }

    /// Whether `agent_id` finished in an earlier run
    pub fn is_retired(&self, agent_id: &str) -> bool {
        self.state.is_retired(agent_id)
    }

    /// Queue entries that pick up where the previous run stopped: agents with
    /// a task in flight first, then agents waiting for their next window
    pub fn restored_entries(&self) -> Vec<QueuedAgent> {
        let resumed = self
            .state
            .active()
            .values()
            .cloned()
            .map(QueuedAgent::Resumed);
        let continuing = self
            .state
            .pending()
            .iter()
            .map(|(agent_id, pending)| QueuedAgent::Continuing {
                agent_id: agent_id.clone(),
                next_start: pending.next_start,
                final_end: pending.final_end,
                windows_submitted: pending.windows_submitted,
            });
        resumed.chain(continuing).collect()
    }

    /// Record the scheduler's in-flight agents and write the state file
    pub fn checkpoint(
        &mut self,
        active: &BTreeMap<String, AgentExportState>,
        queue: &AdmissionQueue,
    ) -> Result<(), ResumeError> {
        let mut in_flight = active.clone();
        let mut pending = BTreeMap::new();

        for entry in queue.iter() {
            match entry {
                QueuedAgent::Resumed(state) => {
                    in_flight.insert(state.agent_id.clone(), state.clone());
                }
                QueuedAgent::Continuing {
                    agent_id,
                    next_start,
                    final_end,
                    windows_submitted,
                } => {
                    pending.insert(
                        agent_id.clone(),
                        PendingWindow {
                            next_start: *next_start,
                            final_end: *final_end,
                            windows_submitted: *windows_submitted,
                        },
                    );
                }
                // Re-planned from the agent listing on the next run
                QueuedAgent::Fresh(_) => {}
            }
        }

        self.state.set_in_flight(in_flight, pending);
        self.state.save(&self.path)
    }

    /// Record a retired agent and write the state file
    pub fn mark_retired(&mut self, agent_id: &str) -> Result<(), ResumeError> {
        self.state.mark_retired(agent_id);
        self.state.save(&self.path)
    }

    /// Remove the state file after a completed run
    pub fn clear(&mut self) -> Result<(), ResumeError> {
        self.state = ResumeState::new();
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }
        info!(path = %self.path.display(), "Cleared resume state after completed run");
        Ok(())
    }
}
