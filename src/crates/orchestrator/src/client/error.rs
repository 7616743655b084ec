//! Errors from outbound calls

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tooling::async_utils::parse_retry_after;
use tooling::logging::{sanitize_for_logging, truncate_for_logging};

/// Wait suggested when a 429 carries no usable `Retry-After`
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("circuit open for {dependency}")]
    CircuitOpen {
        dependency: String,
        retry_after: Duration,
    },

    #[error("rate limited, retry after {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    /// The dependency refused the request itself (4xx)
    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    Decode(String),

    #[error("call cancelled")]
    Cancelled,
}

impl UpstreamError {
    /// Worth another attempt against the same dependency
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Unavailable(_) => true,
            UpstreamError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Counts as a failure of the dependency for its circuit breaker
    ///
    /// Rejections and rate limits mean the dependency answered.
    pub fn trips_breaker(&self) -> bool {
        self.is_retryable()
    }

    /// Error for a non-success response
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        Self::from_status(status, retry_after, &body)
    }

    pub fn from_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Self {
        // Error bodies share the `{error, message, code}` shape
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.to_string());
        let message = truncate_for_logging(&sanitize_for_logging(&message), 200);

        if status == StatusCode::TOO_MANY_REQUESTS {
            UpstreamError::RateLimited {
                retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
            }
        } else if status.is_client_error() {
            UpstreamError::Rejected(format!("HTTP {}: {}", status.as_u16(), message))
        } else {
            UpstreamError::Status {
                status: status.as_u16(),
                message,
            }
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        let message = sanitize_for_logging(&err.to_string());
        if err.is_timeout() {
            UpstreamError::Timeout(message)
        } else if err.is_decode() {
            UpstreamError::Decode(message)
        } else if let Some(status) = err.status() {
            UpstreamError::from_status(status, None, &message)
        } else {
            UpstreamError::Unavailable(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = UpstreamError::from_status(StatusCode::SERVICE_UNAVAILABLE, None, "down");
        assert!(err.is_retryable());
        assert!(err.trips_breaker());

        let err = UpstreamError::from_status(
            StatusCode::BAD_REQUEST,
            None,
            r#"{"error":"ValidationError","message":"text must not be empty","code":"VALIDATION_ERROR"}"#,
        );
        assert_eq!(err, UpstreamError::Rejected("HTTP 400: text must not be empty".into()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rate_limited_uses_retry_after() {
        let err = UpstreamError::from_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(36)),
            "",
        );
        assert_eq!(
            err,
            UpstreamError::RateLimited {
                retry_after: Duration::from_secs(36)
            }
        );
        assert!(!err.trips_breaker());

        let err = UpstreamError::from_status(StatusCode::TOO_MANY_REQUESTS, None, "");
        assert_eq!(
            err,
            UpstreamError::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER
            }
        );
    }
}
