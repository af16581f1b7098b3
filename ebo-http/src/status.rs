//! Status-code classification.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Decides whether a response status should trigger a retry.
pub type ResponseChecker = fn(StatusCode) -> bool;

/// Default checker: server errors and `429 Too Many Requests`.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// A response whose status the checker flagged.
#[derive(Debug, Clone, Error)]
#[error("HTTP {status}: {body}")]
pub struct StatusError {
    /// Response status.
    pub status: StatusCode,
    /// Response body, empty if it could not be read.
    pub body: String,
    /// Server-suggested wait from the `Retry-After` header.
    pub retry_after: Option<Duration>,
}

impl StatusError {
    /// Consume `response` into an error.
    pub async fn from_response(response: Response) -> Self {
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Self {
            status,
            body,
            retry_after,
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
///
/// The HTTP-date form is not supported and yields `None`.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
