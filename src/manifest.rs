//! Archive manifest parsing
//!
//! Every export archive carries a JSON manifest (the file whose category is
//! [`MANIFEST_CATEGORY`]) describing the window that was requested and the
//! range the service actually covered.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{parse_utc, MANIFEST_TIME_FORMAT};

/// Category of the manifest file inside an export archive
pub const MANIFEST_CATEGORY: &str = "results";

/// Manifest parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The manifest is not valid JSON of the expected shape
    #[error("invalid manifest JSON: {0}")]
    Json(String),

    /// A timestamp field could not be parsed
    #[error("invalid manifest timestamp {field}='{value}'")]
    InvalidTimestamp {
        /// Manifest field name
        field: &'static str,
        /// Raw value
        value: String,
    },
}

/// Deserialized export manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportManifest {
    /// Requested window start
    pub requested_start_time: String,
    /// Requested window end
    pub requested_end_time: String,
    /// Actual coverage, absent when the service collected nothing
    #[serde(default)]
    pub export_summary: Option<ExportSummary>,
}

/// Actual coverage reported by the service
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportSummary {
    /// First timestamp with data
    #[serde(default)]
    pub actual_start_time: Option<String>,
    /// Timestamp after the last data point
    #[serde(default)]
    pub actual_end_time: Option<String>,
}

/// Where a covered range came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSource {
    /// The service reported the actual coverage
    Actual,
    /// No actual coverage was reported; the requested window is assumed
    Requested,
}

/// The time range an export actually covered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoveredRange {
    /// Start of coverage
    pub start: DateTime<Utc>,
    /// End of coverage
    pub end: DateTime<Utc>,
    /// Origin of the values
    pub source: RangeSource,
}

impl CoveredRange {
    /// A range whose start equals its end carries no data
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl ExportManifest {
    /// Parse a manifest from raw bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        serde_json::from_slice(bytes).map_err(|e| ManifestError::Json(e.to_string()))
    }

    /// Resolve the range the export covered.
    ///
    /// The actual end wins when present, paired with the actual start or the
    /// requested start when the actual start is missing. Without an actual end
    /// both values fall back to the requested window.
    pub fn covered_range(&self) -> Result<CoveredRange, ManifestError> {
        let requested_start = parse_field("RequestedStartTime", &self.requested_start_time)?;
        let requested_end = parse_field("RequestedEndTime", &self.requested_end_time)?;

        let summary = self.export_summary.as_ref();
        let actual_end = summary.and_then(|s| non_blank(s.actual_end_time.as_deref()));

        match actual_end {
            Some(end) => {
                let end = parse_field("ActualEndTime", end)?;
                let start = match summary.and_then(|s| non_blank(s.actual_start_time.as_deref())) {
                    Some(start) => parse_field("ActualStartTime", start)?,
                    None => requested_start,
                };
                Ok(CoveredRange {
                    start,
                    end,
                    source: RangeSource::Actual,
                })
            }
            None => Ok(CoveredRange {
                start: requested_start,
                end: requested_end,
                source: RangeSource::Requested,
            }),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_field(field: &'static str, value: &str) -> Result<DateTime<Utc>, ManifestError> {
    parse_utc(value, MANIFEST_TIME_FORMAT).map_err(|_| ManifestError::InvalidTimestamp {
        field,
        value: value.to_string(),
    })
}
