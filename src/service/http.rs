//! HTTP client for the discovery JSON API
//!
//! Every operation is a POST of a JSON body with the operation named in the
//! `X-Amz-Target` header. Transient failures are retried with bounded
//! exponential backoff:
//! - Network errors (timeout, connection refused)
//! - 5xx server errors
//! - Throttling (429 or `ThrottlingException`)
//!
//! Everything else is classified once and returned to the caller.
//!
//! Requests carry no request signature. The endpoint must be a gateway or
//! proxy that authenticates calls to the service on the client's behalf.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::exporter::config::{calculate_backoff, MAX_RETRIES};
use crate::metrics::ExportMetrics;
use crate::window::ExportWindow;
use crate::{Agent, ExportTask};

use super::protocol::{
    classify_error, normalize_token, DescribeAgentsRequest, DescribeAgentsResponse,
    DescribeExportTasksRequest, DescribeExportTasksResponse, Filter, StartExportTaskRequest,
    StartExportTaskResponse, DESCRIBE_AGENTS_PAGE_SIZE,
};
use super::{AgentPage, DiscoveryService, ExportTaskPage, ServiceError, ServiceResult};

/// Prefix of the `X-Amz-Target` header value
const TARGET_PREFIX: &str = "AWSPoirot";

/// Content type of every request
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Discovery API client
pub struct DiscoveryHttpClient {
    client: Arc<Client>,
    endpoint: String,
    max_retries: u32,
}

impl DiscoveryHttpClient {
    /// Create a client for `endpoint`
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client
    /// * `endpoint` - Authenticating gateway URL (e.g., "<http://127.0.0.1:8080>")
    pub fn new(client: Arc<Client>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            max_retries: MAX_RETRIES,
        }
    }

    /// Override the number of retries for transient failures
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Service endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Invoke `operation` with `body` and deserialize the response
    ///
    /// # Errors
    /// Returns the classified [`ServiceError`] once retries are exhausted or a
    /// non-retryable error is returned
    pub async fn call<B, T>(&self, operation: &str, body: &B) -> ServiceResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let target = format!("{}.{}", TARGET_PREFIX, operation);
        let payload = serde_json::to_vec(body)
            .map_err(|e| ServiceError::ParseError(format!("failed to encode {}: {}", operation, e)))?;

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            debug!(operation, attempt = attempt + 1, "Calling discovery service");

            let response = match self
                .client
                .post(&self.endpoint)
                .header("X-Amz-Target", &target)
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
                .body(payload.clone())
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(
                        operation,
                        "Network error on attempt {}/{}: {}",
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );
                    last_error = Some(ServiceError::NetworkError(e.to_string()));
                    if attempt < self.max_retries {
                        self.backoff(operation, attempt).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();

            if status.is_success() {
                return response.json::<T>().await.map_err(|e| {
                    ServiceError::ParseError(format!("failed to decode {} response: {}", operation, e))
                });
            }

            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let error = classify_error(status.as_u16(), &text);

            if status.is_server_error() || matches!(error, ServiceError::Throttled) {
                warn!(
                    operation,
                    status = status.as_u16(),
                    "Transient service error on attempt {}/{}: {}",
                    attempt + 1,
                    self.max_retries + 1,
                    error
                );
                last_error = Some(error);
                if attempt < self.max_retries {
                    self.backoff(operation, attempt).await;
                    continue;
                }
                break;
            }

            return Err(error);
        }

        Err(last_error
            .unwrap_or_else(|| ServiceError::NetworkError("All retries exhausted".to_string())))
    }

    async fn backoff(&self, operation: &str, attempt: u32) {
        let delay = calculate_backoff(attempt);
        ExportMetrics::record_service_retry(operation, delay);
        debug!(operation, "Retrying after {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl DiscoveryService for DiscoveryHttpClient {
    async fn describe_agents(&self, next_token: Option<&str>) -> ServiceResult<AgentPage> {
        let request = DescribeAgentsRequest {
            max_results: DESCRIBE_AGENTS_PAGE_SIZE,
            next_token,
        };
        let response: DescribeAgentsResponse = self.call("DescribeAgents", &request).await?;

        let mut agents = Vec::with_capacity(response.agents_info.len());
        for info in response.agents_info {
            let agent_id = info.agent_id.clone();
            match Agent::try_from(info) {
                Ok(agent) => agents.push(agent),
                Err(e) => warn!(agent_id = %agent_id, "Skipping agent: {}", e),
            }
        }

        Ok(AgentPage {
            agents,
            next_token: normalize_token(response.next_token),
        })
    }

    async fn start_export_task(&self, agent_id: &str, window: &ExportWindow) -> ServiceResult<String> {
        let request = StartExportTaskRequest::new(agent_id, window);
        let response: StartExportTaskResponse = self.call("StartExportTask", &request).await?;
        if response.export_id.is_empty() {
            return Err(ServiceError::InvalidResponse(
                "StartExportTask returned an empty export id".to_string(),
            ));
        }
        Ok(response.export_id)
    }

    async fn describe_export_tasks(
        &self,
        export_id: &str,
        agent_id: &str,
        next_token: Option<&str>,
    ) -> ServiceResult<ExportTaskPage> {
        let request = DescribeExportTasksRequest {
            export_ids: vec![export_id],
            filters: vec![Filter::agent_id(agent_id)],
            next_token,
        };
        let response: DescribeExportTasksResponse = self.call("DescribeExportTasks", &request).await?;

        Ok(ExportTaskPage {
            tasks: response.exports_info.into_iter().map(ExportTask::from).collect(),
            next_token: normalize_token(response.next_token),
        })
    }
}
