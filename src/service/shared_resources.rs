//! Shared HTTP client for the service and archive downloads
//!
//! Both the discovery API calls and the archive downloads go through one
//! connection pool, built lazily on first use.

use once_cell::sync::OnceCell;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use super::{ServiceError, ServiceResult};

/// HTTP connect timeout (seconds)
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds), sized for archive downloads
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 300;

static SHARED_HTTP_CLIENT: OnceCell<Arc<Client>> = OnceCell::new();

/// Build an HTTP client with the standard timeouts
pub fn build_http_client() -> ServiceResult<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .user_agent(concat!("discovery-export/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ServiceError::NetworkError(format!("failed to build HTTP client: {}", e)))
}

/// Get the process-wide HTTP client, building it on first call
pub fn shared_http_client() -> ServiceResult<Arc<Client>> {
    SHARED_HTTP_CLIENT
        .get_or_try_init(|| build_http_client().map(Arc::new))
        .cloned()
}
