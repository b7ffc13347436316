//! Remote discovery service contract and client

use async_trait::async_trait;

use crate::window::ExportWindow;
use crate::{Agent, ExportTask};

pub mod archive;
pub mod http;
pub mod pagination;
pub mod protocol;
pub mod shared_resources;

/// Service errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The service refused a new export because too many are running
    #[error("concurrent export limit reached: {0}")]
    ConcurrencyLimitExceeded(String),

    /// An export covering the requested window already exists
    #[error("export already exists with id {export_id}")]
    DuplicateExport {
        /// Identifier of the existing export task
        export_id: String,
        /// Message returned by the service
        message: String,
    },

    /// Any other error response from the service
    #[error("API error {code}: {message}")]
    ApiError {
        /// Error type reported by the service
        code: String,
        /// Error message reported by the service
        message: String,
    },

    /// The service kept throttling requests
    #[error("request throttled by the service")]
    Throttled,

    /// HTTP-level error without a structured body
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network error
    #[error("network error: {0}")]
    NetworkError(String),

    /// Response parse error
    #[error("parse error: {0}")]
    ParseError(String),

    /// Response was well-formed but semantically invalid
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Archive download error
    #[error("archive error: {0}")]
    ArchiveError(String),
}

impl ServiceError {
    /// Whether a retry of the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Throttled | ServiceError::NetworkError(_) | ServiceError::HttpError(_)
        )
    }
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// One page of the agent listing
#[derive(Debug, Clone, Default)]
pub struct AgentPage {
    /// Agents on this page
    pub agents: Vec<Agent>,
    /// Token for the next page, absent on the last page
    pub next_token: Option<String>,
}

/// One page of an export task query
#[derive(Debug, Clone, Default)]
pub struct ExportTaskPage {
    /// Tasks on this page
    pub tasks: Vec<ExportTask>,
    /// Token for the next page, absent on the last page
    pub next_token: Option<String>,
}

/// Operations the exporter needs from the remote discovery service
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// List one page of registered agents
    async fn describe_agents(&self, next_token: Option<&str>) -> ServiceResult<AgentPage>;

    /// Request an export of `window` for a single agent
    ///
    /// # Returns
    /// The new export task identifier
    ///
    /// # Errors
    /// [`ServiceError::ConcurrencyLimitExceeded`] when too many exports are running and
    /// [`ServiceError::DuplicateExport`] when the window was already exported
    async fn start_export_task(&self, agent_id: &str, window: &ExportWindow) -> ServiceResult<String>;

    /// Query one page of export tasks matching `export_id` for `agent_id`
    async fn describe_export_tasks(
        &self,
        export_id: &str,
        agent_id: &str,
        next_token: Option<&str>,
    ) -> ServiceResult<ExportTaskPage>;
}
