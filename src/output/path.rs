//! Staging layout for extracted export files
//!
//! Files land in a three-level hierarchy below the staging root:
//! `<root>/agentExports/<agentId>/<category>/<windowStart>_<fileName>`
//!
//! # Usage Example
//!
//! ```rust
//! use discovery_export::output::StagingLayout;
//! use chrono::{TimeZone, Utc};
//! use std::path::PathBuf;
//!
//! let layout = StagingLayout::new("exports");
//! let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
//! let path = layout
//!     .staged_file_path("o-1", "networkInterface", start, "o-1_networkInterface.csv")
//!     .unwrap();
//! assert_eq!(
//!     path,
//!     PathBuf::from("exports/agentExports/o-1/networkInterface/2020-01-01T000000Z_o-1_networkInterface.csv")
//! );
//! ```

use chrono::{DateTime, Utc};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::{OutputError, OutputResult};
use crate::STAGED_PREFIX_FORMAT;

/// Directory below the staging root that holds all agent exports
pub const EXPORTS_DIR: &str = "agentExports";

/// Staged file name for `file_name` extracted from the window starting at `window_start`
pub fn staged_file_name(window_start: DateTime<Utc>, file_name: &str) -> String {
    format!("{}_{}", window_start.format(STAGED_PREFIX_FORMAT), file_name)
}

/// Make `name` safe to use as a single path component.
///
/// Separators and `:` become `_` and `..` becomes `__`, so a component can
/// never climb out of its parent directory.
pub fn sanitize_component(name: &str) -> String {
    name.trim()
        .replace("..", "__")
        .replace(['/', '\\', ':'], "_")
}

/// Path builder and writer for staged files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    /// Create a layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Staging root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/agentExports`
    pub fn exports_dir(&self) -> PathBuf {
        self.root.join(EXPORTS_DIR)
    }

    /// `<root>/agentExports/<agentId>`
    pub fn agent_dir(&self, agent_id: &str) -> OutputResult<PathBuf> {
        Ok(self.exports_dir().join(component(agent_id)?))
    }

    /// `<root>/agentExports/<agentId>/<category>`
    pub fn category_dir(&self, agent_id: &str, category: &str) -> OutputResult<PathBuf> {
        Ok(self.agent_dir(agent_id)?.join(component(category)?))
    }

    /// Full path of a staged file
    pub fn staged_file_path(
        &self,
        agent_id: &str,
        category: &str,
        window_start: DateTime<Utc>,
        file_name: &str,
    ) -> OutputResult<PathBuf> {
        let name = staged_file_name(window_start, &component(file_name)?);
        Ok(self.category_dir(agent_id, category)?.join(name))
    }

    /// Create the category directory; succeeds if it already exists
    pub fn ensure_category_dir(&self, agent_id: &str, category: &str) -> OutputResult<PathBuf> {
        let dir = self.category_dir(agent_id, category)?;
        std::fs::create_dir_all(&dir).map_err(|e| {
            OutputError::IoError(format!("Failed to create directory {}: {}", dir.display(), e))
        })?;
        Ok(dir)
    }

    /// Write `contents` to its staged location.
    ///
    /// The data is written to a temporary file in the target directory first
    /// and renamed into place, so a staged file is either complete or absent.
    pub fn stage<R: Read>(
        &self,
        agent_id: &str,
        category: &str,
        window_start: DateTime<Utc>,
        file_name: &str,
        contents: &mut R,
    ) -> OutputResult<PathBuf> {
        let dir = self.ensure_category_dir(agent_id, category)?;
        let target = self.staged_file_path(agent_id, category, window_start, file_name)?;

        let mut temp = NamedTempFile::new_in(&dir)
            .map_err(|e| OutputError::IoError(format!("Failed to create temp file: {}", e)))?;
        std::io::copy(contents, &mut temp).map_err(|e| {
            OutputError::IoError(format!("Failed to write {}: {}", target.display(), e))
        })?;
        temp.flush()
            .map_err(|e| OutputError::IoError(format!("Failed to flush temp file: {}", e)))?;
        temp.persist(&target).map_err(|e| {
            OutputError::IoError(format!("Failed to persist {}: {}", target.display(), e.error))
        })?;

        Ok(target)
    }
}

fn component(name: &str) -> OutputResult<String> {
    let sanitized = sanitize_component(name);
    if sanitized.is_empty() || sanitized == "." {
        return Err(OutputError::InvalidComponent(name.to_string()));
    }
    Ok(sanitized)
}
