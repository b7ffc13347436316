//! Bounded pagination over the discovery listing operations
//!
//! Both listings follow `nextToken` until it is absent. Iteration stops after
//! [`MAX_PAGES`] pages or when the service repeats a token, so a misbehaving
//! service can never trap the caller in an endless loop.

use tracing::{debug, warn};

use crate::{Agent, ExportTask};

use super::{DiscoveryService, ServiceError, ServiceResult};

/// Maximum number of pages followed by a single listing
pub const MAX_PAGES: usize = 1_000;

/// Pagination helper for discovery listings
pub struct PaginationHelper;

impl PaginationHelper {
    /// Collect every registered agent across all pages
    ///
    /// # Errors
    /// Returns the first service error, or [`ServiceError::InvalidResponse`]
    /// when the page limit is exceeded
    pub async fn collect_agents(service: &dyn DiscoveryService) -> ServiceResult<Vec<Agent>> {
        let mut agents = Vec::new();
        let mut token: Option<String> = None;

        for page in 0..MAX_PAGES {
            let response = service.describe_agents(token.as_deref()).await?;
            debug!(page, count = response.agents.len(), "Fetched agent page");
            agents.extend(response.agents);

            match response.next_token {
                None => return Ok(agents),
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    warn!(token = %next, "Agent listing repeated a page token; stopping");
                    return Ok(agents);
                }
                Some(next) => token = Some(next),
            }
        }

        Err(ServiceError::InvalidResponse(format!(
            "agent listing exceeded {} pages",
            MAX_PAGES
        )))
    }

    /// Find `export_id` in the export task listing for `agent_id`
    ///
    /// # Returns
    /// `None` when the listing is exhausted without a match
    pub async fn find_export_task(
        service: &dyn DiscoveryService,
        export_id: &str,
        agent_id: &str,
    ) -> ServiceResult<Option<ExportTask>> {
        let mut token: Option<String> = None;

        for page in 0..MAX_PAGES {
            let response = service
                .describe_export_tasks(export_id, agent_id, token.as_deref())
                .await?;

            if let Some(task) = response.tasks.into_iter().find(|t| t.export_id == export_id) {
                debug!(page, export_id, "Found export task");
                return Ok(Some(task));
            }

            match response.next_token {
                None => return Ok(None),
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    warn!(export_id, token = %next, "Export listing repeated a page token; stopping");
                    return Ok(None);
                }
                Some(next) => token = Some(next),
            }
        }

        warn!(export_id, "Export listing exceeded {} pages", MAX_PAGES);
        Ok(None)
    }
}
