//! Staging of extracted archive files

pub mod path;

pub use path::{sanitize_component, staged_file_name, StagingLayout, EXPORTS_DIR};

/// Output errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// A path component was empty after sanitization
    #[error("invalid path component: '{0}'")]
    InvalidComponent(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
