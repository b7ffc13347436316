//! Result archive extraction
//!
//! A succeeded export yields a zip archive of per-category files plus one
//! manifest. Every file's category is derived from its name
//! (`<agentId>_<category>.<ext>`); the manifest's category is
//! [`MANIFEST_CATEGORY`]. Data files are staged below the staging root, the
//! manifest is parsed for the range the export actually covered.

use chrono::{DateTime, Utc};
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use zip::ZipArchive;

use super::{ExportError, ExportResult};
use crate::manifest::{CoveredRange, ExportManifest, MANIFEST_CATEGORY};
use crate::output::StagingLayout;
use crate::service::archive::{download_with_retry, ArchiveFetcher, DownloadRetryPolicy};

/// Largest buffer reserved up front for a manifest; the size declared in the
/// zip header is not trusted beyond this
const MANIFEST_PREALLOC_LIMIT: usize = 1 << 20;

/// Files staged from one archive and the range it covered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Range read from the manifest
    pub covered: CoveredRange,
    /// Paths of the staged data files
    pub staged: Vec<PathBuf>,
}

/// Category of an archive entry: the token after the last `_` of the basename,
/// up to its first `.`
///
/// ```
/// use discovery_export::exporter::category_of;
///
/// assert_eq!(category_of("d-server-01_systemPerformance.csv"), Some("systemPerformance"));
/// assert_eq!(category_of("export/results.json"), Some("results"));
/// assert_eq!(category_of("_.csv"), None);
/// ```
pub fn category_of(entry_name: &str) -> Option<&str> {
    let base = basename(entry_name)?;
    let token = base.rsplit('_').next()?;
    let category = token.split('.').next()?;
    if category.is_empty() {
        None
    } else {
        Some(category)
    }
}

fn basename(entry_name: &str) -> Option<&str> {
    entry_name
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
}

/// Downloads, unpacks and stages export archives
pub struct ResultExtractor {
    fetcher: Arc<dyn ArchiveFetcher>,
    layout: StagingLayout,
    retry: DownloadRetryPolicy,
}

impl ResultExtractor {
    /// Create an extractor staging into `layout`
    pub fn new(fetcher: Arc<dyn ArchiveFetcher>, layout: StagingLayout) -> Self {
        Self {
            fetcher,
            layout,
            retry: DownloadRetryPolicy::default(),
        }
    }

    /// Override the download retry policy
    pub fn with_retry_policy(mut self, retry: DownloadRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Staging layout in use
    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    /// Download the archive at `url` and stage its contents
    ///
    /// # Arguments
    /// * `agent_id` - Agent the export belongs to
    /// * `window_start` - Start of the exported window, used as the file prefix
    /// * `url` - Archive location
    pub async fn extract(
        &self,
        agent_id: &str,
        window_start: DateTime<Utc>,
        url: &str,
    ) -> ExportResult<Extraction> {
        debug!(agent_id, url, "Downloading export archive");
        let archive = download_with_retry(self.fetcher.as_ref(), url, &self.retry)
            .await
            .map_err(|e| ExportError::ArchiveUnavailable {
                agent_id: agent_id.to_string(),
                attempts: self.retry.attempts.max(1),
                reason: e.to_string(),
            })?;

        let extraction = unpack_archive(&self.layout, agent_id, window_start, &archive)?;
        info!(
            agent_id,
            files = extraction.staged.len(),
            covered_start = %extraction.covered.start,
            covered_end = %extraction.covered.end,
            "Staged export archive"
        );
        Ok(extraction)
    }
}

fn manifest_capacity(declared_size: u64) -> usize {
    usize::try_from(declared_size)
        .unwrap_or(usize::MAX)
        .min(MANIFEST_PREALLOC_LIMIT)
}

/// Unpack an in-memory archive and stage its data files
///
/// # Errors
/// [`ExportError::InvalidArchive`] when the archive is unreadable or carries no
/// manifest, [`ExportError::Manifest`] when the manifest is malformed
pub fn unpack_archive(
    layout: &StagingLayout,
    agent_id: &str,
    window_start: DateTime<Utc>,
    archive: &[u8],
) -> ExportResult<Extraction> {
    let invalid = |reason: String| ExportError::InvalidArchive {
        agent_id: agent_id.to_string(),
        reason,
    };

    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| invalid(format!("failed to open zip: {}", e)))?;

    let mut covered = None;
    let mut staged = Vec::new();

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| invalid(format!("failed to read entry {}: {}", index, e)))?;

        if entry.is_dir() {
            continue;
        }

        let entry_name = entry.name().to_string();
        let (Some(file_name), Some(category)) = (basename(&entry_name), category_of(&entry_name))
        else {
            debug!(agent_id, entry = %entry_name, "Skipping entry without a category");
            continue;
        };

        if category == MANIFEST_CATEGORY {
            let mut contents = Vec::with_capacity(manifest_capacity(entry.size()));
            entry
                .read_to_end(&mut contents)
                .map_err(|e| invalid(format!("failed to read manifest: {}", e)))?;
            covered = Some(ExportManifest::from_slice(&contents)?.covered_range()?);
            continue;
        }

        let path = layout.stage(agent_id, category, window_start, file_name, &mut entry)?;
        debug!(agent_id, category, path = %path.display(), "Staged file");
        staged.push(path);
    }

    let covered = covered.ok_or_else(|| invalid("archive has no results manifest".to_string()))?;
    Ok(Extraction { covered, staged })
}
