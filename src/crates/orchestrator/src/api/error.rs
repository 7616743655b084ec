//! API error types and HTTP response conversion
//!
//! Every failure is reported as `{error, message, code}`, where `error` is
//! the taxonomy name of the underlying [`OrchestratorError`].

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reflex::http::retry_after_secs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::client::UpstreamError;
use crate::OrchestratorError;

/// API error response structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for programmatic handling
    pub code: String,
    /// Screening verdict of rejected content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            code: code.into(),
            details: None,
        }
    }
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path, query or body
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        ApiError::Orchestrator(err.into())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        let err = match self {
            ApiError::BadRequest(_) => return StatusCode::BAD_REQUEST,
            ApiError::Orchestrator(err) => err,
        };
        match err {
            OrchestratorError::Validation(_) | OrchestratorError::UnsafeContent { .. } => StatusCode::BAD_REQUEST,
            OrchestratorError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            OrchestratorError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            OrchestratorError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            OrchestratorError::NoCapableArm(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::InvalidTransition { .. } => StatusCode::CONFLICT,
            OrchestratorError::BudgetExceeded(_) | OrchestratorError::AcceptanceCriteria(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            OrchestratorError::Database(db) if db.is_not_found() => StatusCode::NOT_FOUND,
            OrchestratorError::Cancelled => StatusCode::CONFLICT,
            OrchestratorError::Database(_) | OrchestratorError::Config(_) | OrchestratorError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        let err = match self {
            ApiError::BadRequest(_) => return "BAD_REQUEST",
            ApiError::Orchestrator(err) => err,
        };
        match err {
            OrchestratorError::Validation(_) => "VALIDATION_ERROR",
            OrchestratorError::UnsafeContent { .. } => "UNSAFE_CONTENT",
            OrchestratorError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            OrchestratorError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            OrchestratorError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            OrchestratorError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            OrchestratorError::NoCapableArm(_) => "NO_CAPABLE_ARM",
            OrchestratorError::TaskNotFound(_) => "NOT_FOUND",
            OrchestratorError::InvalidTransition { .. } => "INVALID_TRANSITION",
            OrchestratorError::BudgetExceeded(_) => "BUDGET_EXCEEDED",
            OrchestratorError::AcceptanceCriteria(_) => "ACCEPTANCE_CRITERIA",
            OrchestratorError::Cancelled => "CANCELLED",
            OrchestratorError::Database(_) => "DB_ERROR",
            OrchestratorError::Config(_) | OrchestratorError::Serialization(_) => "INTERNAL_ERROR",
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "ValidationError",
            ApiError::Orchestrator(err) => err.kind(),
        }
    }

    /// Message safe to return to a client
    fn public_message(&self) -> String {
        match self {
            ApiError::Orchestrator(
                err @ (OrchestratorError::Database(_)
                | OrchestratorError::Config(_)
                | OrchestratorError::Serialization(_)),
            ) => err.reason(),
            other => other.to_string(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Orchestrator(OrchestratorError::RateLimited { retry_after })
            | ApiError::Orchestrator(OrchestratorError::CircuitOpen { retry_after, .. }) => Some(*retry_after),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = ApiErrorResponse::new(self.error_type(), self.public_message(), self.code());
        if let ApiError::Orchestrator(OrchestratorError::UnsafeContent { result, .. }) = &self {
            body.details = serde_json::to_value(result.as_ref()).ok();
        }

        if status.is_server_error() {
            tracing::error!(code = %body.code, "API error: {}", self);
        } else {
            tracing::debug!(code = %body.code, "Request rejected: {}", body.message);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(wait) = self.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(wait).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
