//! Wire types of the discovery JSON API and conversion to domain types
//!
//! Requests are JSON bodies POSTed to a single endpoint; the operation is
//! selected with the `X-Amz-Target` header. Error responses carry
//! `{"__type": ..., "message": ...}` and are classified here into
//! [`ServiceError`] variants so callers can dispatch on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::window::ExportWindow;
use crate::{parse_utc, Agent, ExportStatus, ExportTask, AGENT_TIME_FORMAT};

use super::{ServiceError, ServiceResult};

/// Error type returned when an export operation is not allowed
pub const OPERATION_NOT_PERMITTED: &str = "OperationNotPermittedException";

/// Error type returned when requests are throttled
pub const THROTTLING_EXCEPTION: &str = "ThrottlingException";

/// Final token of the message sent when too many exports are running
const CONCURRENCY_LIMIT_SUFFIX: &str = "another.";

/// Token preceding the existing export id in the duplicate-export message
const DUPLICATE_ID_MARKER: &str = "ID:";

/// Page size requested when listing agents
pub const DESCRIBE_AGENTS_PAGE_SIZE: u32 = 100;

/// Filter selecting a single agent
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Filter<'a> {
    /// Filter attribute
    pub name: &'static str,
    /// Accepted values
    pub values: Vec<&'a str>,
    /// Comparison
    pub condition: &'static str,
}

impl<'a> Filter<'a> {
    /// Match exactly one agent id
    pub fn agent_id(agent_id: &'a str) -> Self {
        Self {
            name: "agentIds",
            values: vec![agent_id],
            condition: "EQUALS",
        }
    }
}

/// `DescribeAgents` request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeAgentsRequest<'a> {
    /// Page size
    pub max_results: u32,
    /// Continuation token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<&'a str>,
}

/// `StartExportTask` request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExportTaskRequest<'a> {
    /// Agent selection
    pub filters: Vec<Filter<'a>>,
    /// Window start, epoch seconds
    pub start_time: i64,
    /// Window end, epoch seconds
    pub end_time: i64,
}

impl<'a> StartExportTaskRequest<'a> {
    /// Build the request for one agent and window
    pub fn new(agent_id: &'a str, window: &ExportWindow) -> Self {
        Self {
            filters: vec![Filter::agent_id(agent_id)],
            start_time: window.start.timestamp(),
            end_time: window.end.timestamp(),
        }
    }
}

/// `DescribeExportTasks` request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeExportTasksRequest<'a> {
    /// Export ids to look up
    pub export_ids: Vec<&'a str>,
    /// Agent selection
    pub filters: Vec<Filter<'a>>,
    /// Continuation token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<&'a str>,
}

/// Agent entry of a `DescribeAgents` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    /// Agent identifier
    pub agent_id: String,
    /// Agent type
    #[serde(default)]
    pub agent_type: Option<String>,
    /// Registration time
    #[serde(default)]
    pub registered_time: Option<String>,
    /// Last health ping time
    #[serde(default)]
    pub last_health_ping_time: Option<String>,
}

impl TryFrom<AgentInfo> for Agent {
    type Error = ServiceError;

    fn try_from(info: AgentInfo) -> Result<Self, Self::Error> {
        let registered_time = parse_agent_time(&info.agent_id, "registeredTime", info.registered_time)?;
        let last_health_ping_time =
            parse_agent_time(&info.agent_id, "lastHealthPingTime", info.last_health_ping_time)?;

        Ok(Agent {
            agent_id: info.agent_id,
            agent_type: info.agent_type.unwrap_or_default(),
            registered_time,
            last_health_ping_time,
        })
    }
}

fn parse_agent_time(
    agent_id: &str,
    field: &str,
    value: Option<String>,
) -> ServiceResult<DateTime<Utc>> {
    let value = value.ok_or_else(|| {
        ServiceError::ParseError(format!("agent {} has no {}", agent_id, field))
    })?;
    parse_utc(&value, AGENT_TIME_FORMAT).map_err(|e| {
        ServiceError::ParseError(format!(
            "agent {} has invalid {} '{}': {}",
            agent_id, field, value, e
        ))
    })
}

/// `DescribeAgents` response body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeAgentsResponse {
    /// Agents on this page
    #[serde(default)]
    pub agents_info: Vec<AgentInfo>,
    /// Continuation token
    #[serde(default)]
    pub next_token: Option<String>,
}

/// `StartExportTask` response body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExportTaskResponse {
    /// New export id
    pub export_id: String,
}

/// Export entry of a `DescribeExportTasks` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportInfo {
    /// Export id
    pub export_id: String,
    /// Raw status string
    pub export_status: String,
    /// Status detail
    #[serde(default)]
    pub status_message: Option<String>,
    /// Archive location
    #[serde(default)]
    pub configurations_download_url: Option<String>,
    /// Requested start, epoch seconds
    #[serde(default)]
    pub requested_start_time: Option<f64>,
    /// Requested end, epoch seconds
    #[serde(default)]
    pub requested_end_time: Option<f64>,
}

impl From<ExportInfo> for ExportTask {
    fn from(info: ExportInfo) -> Self {
        ExportTask {
            status: ExportStatus::parse(&info.export_status),
            export_id: info.export_id,
            status_message: info.status_message,
            download_url: info.configurations_download_url.filter(|url| !url.is_empty()),
            requested_start_time: info.requested_start_time.and_then(epoch_seconds),
            requested_end_time: info.requested_end_time.and_then(epoch_seconds),
        }
    }
}

/// `DescribeExportTasks` response body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeExportTasksResponse {
    /// Matching export tasks
    #[serde(default)]
    pub exports_info: Vec<ExportInfo>,
    /// Continuation token
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Structured error body
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    /// Error type, possibly namespaced with `#`
    #[serde(rename = "__type", default)]
    pub error_type: Option<String>,
    /// Error message (the service uses both casings)
    #[serde(default, alias = "Message")]
    pub message: Option<String>,
}

/// Convert epoch seconds (possibly fractional) to a UTC timestamp
pub fn epoch_seconds(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((value * 1000.0).round() as i64)
}

/// Empty continuation tokens mean the listing is complete
pub fn normalize_token(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.is_empty())
}

/// Classify an error response into a [`ServiceError`]
///
/// # Arguments
/// * `status` - HTTP status code
/// * `body` - Raw response body
pub fn classify_error(status: u16, body: &str) -> ServiceError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let (error_type, message) = match parsed {
        Some(ErrorBody {
            error_type: Some(error_type),
            message,
        }) => (error_type, message.unwrap_or_default()),
        _ => {
            if status == 429 {
                return ServiceError::Throttled;
            }
            return ServiceError::HttpError(format!("status {}: {}", status, body.trim()));
        }
    };

    // "com.amazonaws.discovery#OperationNotPermittedException" -> "OperationNotPermittedException"
    let code = error_type
        .rsplit('#')
        .next()
        .unwrap_or(error_type.as_str())
        .to_string();

    match code.as_str() {
        OPERATION_NOT_PERMITTED => classify_not_permitted(code, message),
        THROTTLING_EXCEPTION => ServiceError::Throttled,
        _ if status == 429 => ServiceError::Throttled,
        _ => ServiceError::ApiError { code, message },
    }
}

fn classify_not_permitted(code: String, message: String) -> ServiceError {
    let mut tokens = message.split_whitespace().rev();
    let last = tokens.next();
    let before_last = tokens.next();

    match (last, before_last) {
        (Some(CONCURRENCY_LIMIT_SUFFIX), _) => ServiceError::ConcurrencyLimitExceeded(message),
        (Some(export_id), Some(marker)) if marker.eq_ignore_ascii_case(DUPLICATE_ID_MARKER) => {
            ServiceError::DuplicateExport {
                export_id: export_id.to_string(),
                message,
            }
        }
        _ => {
            warn!(message = %message, "Unrecognized OperationNotPermitted message");
            ServiceError::ApiError { code, message }
        }
    }
}
