//! CLI error types and conversions

use crate::exporter::ExportError;
use crate::metrics::MetricsError;
use crate::output::OutputError;
use crate::resume::ResumeError;
use crate::service::ServiceError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Remote service error
    #[error("service error: {0}")]
    ServiceError(#[from] ServiceError),

    /// Export run error
    #[error("export error: {0}")]
    ExportError(#[from] ExportError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Resume error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Result serialization error
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
