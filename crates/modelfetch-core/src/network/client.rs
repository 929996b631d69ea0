//! HTTP client for hub downloads.
//!
//! Wraps reqwest with:
//! - Connect timeout and user agent from [`FetchConfig`]
//! - Per-request send timeout
//! - Bearer authentication
//! - HTTP status classification into [`FetchError`]

use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use reqwest::{header, Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// HTTP client owned by a single downloader.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    auth_token: Option<String>,
    request_timeout: Duration,
}

impl HttpClient {
    /// Create a client from configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            auth_token: config.auth_token.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    /// GET `url`, optionally from byte `start` onwards.
    ///
    /// Only the response head is bounded by the request timeout; the body is
    /// streamed by the caller. Error statuses are classified before returning.
    pub async fn get_from(&self, url: &str, start: u64) -> Result<Response> {
        let mut request = self.client.get(url);
        if start > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", start));
        }
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout(self.request_timeout))?
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.request_timeout)
                } else {
                    FetchError::Network {
                        message: format!("GET {} failed: {}", url, e),
                        cause: std::error::Error::source(&e).map(|s| s.to_string()),
                    }
                }
            })?;

        debug!(url, status = response.status().as_u16(), start, "Received response");
        check_response_status(response, url)
    }

    /// Check if an HTTP status code indicates a retryable error.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500..=599)
    }
}

/// Pass successful responses through and classify error statuses.
///
/// `416` is passed through as well; the downloader handles it.
fn check_response_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() || status == StatusCode::RANGE_NOT_SATISFIABLE {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());

    Err(classify_status(status, url, retry_after))
}

/// Map an HTTP error status onto the error taxonomy.
pub fn classify_status(status: StatusCode, url: &str, retry_after_secs: Option<u64>) -> FetchError {
    let url = url.to_string();
    match status.as_u16() {
        401 => FetchError::Unauthorized { url },
        403 => FetchError::Forbidden { url },
        404 => FetchError::NotFound { url },
        408 => FetchError::ServerTimeout { url },
        429 => FetchError::RateLimited {
            service: extract_domain(&url),
            retry_after_secs,
        },
        code @ 500..=599 => FetchError::ServerError { url, status: code },
        code => FetchError::InvalidRequest {
            message: format!("HTTP {} from {}", code, url),
        },
    }
}

/// Extract domain from a URL.
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.host_str().unwrap_or("unknown").to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
