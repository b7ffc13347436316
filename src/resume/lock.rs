//! Exclusive run lock on a resume directory
//!
//! Two runs sharing a resume directory would overwrite each other's state, so
//! a run takes an advisory lock for as long as it holds the directory.

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::state::ResumeError;

/// Name of the lock file inside the resume directory
pub const LOCK_FILE_NAME: &str = "export.lock";

/// Held advisory lock; released when dropped
pub struct RunLock {
    _lock: RwLock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock on `dir` without blocking
    ///
    /// # Errors
    /// [`ResumeError::LockError`] when another run holds it
    pub fn try_acquire(dir: &Path) -> Result<Self, ResumeError> {
        std::fs::create_dir_all(dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        {
            let guard = lock.try_write().map_err(|e| {
                ResumeError::LockError(format!(
                    "{} is locked by another run: {e}",
                    path.display()
                ))
            })?;
            // The lock belongs to the open descriptor; it stays held until the
            // file is closed when `RunLock` drops.
            std::mem::forget(guard);
        }

        debug!(path = %path.display(), "Acquired run lock");
        Ok(Self { _lock: lock, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
