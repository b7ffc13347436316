//! Status polling of in-flight export tasks

use std::sync::Arc;
use tracing::debug;

use super::state::AgentExportState;
use crate::service::pagination::PaginationHelper;
use crate::service::{DiscoveryService, ServiceResult};
use crate::{ExportStatus, ExportTask};

/// Observation of one active agent's task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Still running
    InProgress,
    /// Finished with an archive
    Succeeded(ExportTask),
    /// Finished without data
    Failed(ExportTask),
    /// Reported with a status this client does not know
    Unrecognized(String),
    /// Not present in the status listing
    Missing,
}

/// Looks up the tracked task of each active agent
pub struct Poller {
    service: Arc<dyn DiscoveryService>,
}

impl Poller {
    /// Create a poller for `service`
    pub fn new(service: Arc<dyn DiscoveryService>) -> Self {
        Self { service }
    }

    /// Query the status of the task tracked by `state`
    pub async fn poll(&self, state: &AgentExportState) -> ServiceResult<PollOutcome> {
        let task = PaginationHelper::find_export_task(
            self.service.as_ref(),
            &state.export_id,
            &state.agent_id,
        )
        .await?;

        let Some(task) = task else {
            return Ok(PollOutcome::Missing);
        };

        debug!(
            agent_id = %state.agent_id,
            export_id = %task.export_id,
            status = %task.status,
            "Polled export task"
        );

        Ok(match &task.status {
            ExportStatus::InProgress => PollOutcome::InProgress,
            ExportStatus::Succeeded => PollOutcome::Succeeded(task),
            ExportStatus::Failed => PollOutcome::Failed(task),
            ExportStatus::Unknown(raw) => PollOutcome::Unrecognized(raw.clone()),
        })
    }
}
