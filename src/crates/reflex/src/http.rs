//! HTTP surface of the reflex tier
//!
//! `POST /preprocess`, `GET /health` and `GET /metrics`, for running the
//! pipeline as its own service.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::{PreprocessRequest, PreprocessResult, ReflexPipeline};
use crate::ratelimit::Caller;
use crate::ReflexError;

pub const USER_HEADER: &str = "x-user-id";
pub const PREPROCESS_PATH: &str = "/preprocess";

/// Body of `POST /preprocess`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessBody {
    #[serde(flatten)]
    pub request: PreprocessRequest,

    /// Caller identity for per-user rate limiting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Error body shared with the orchestrator API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub code: String,
}

/// Seconds for a `Retry-After` header, never 0
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Wrapper turning [`ReflexError`] into an HTTP response
#[derive(Debug)]
pub struct HttpError(pub ReflexError);

impl From<ReflexError> for HttpError {
    fn from(err: ReflexError) -> Self {
        Self(err)
    }
}

impl HttpError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            ReflexError::Validation(_) => StatusCode::BAD_REQUEST,
            ReflexError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ReflexError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ReflexError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            // Client went away
            ReflexError::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            ReflexError::Config(_) | ReflexError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match &self.0 {
            ReflexError::Validation(_) => "VALIDATION_ERROR",
            ReflexError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            ReflexError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            ReflexError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            ReflexError::Cancelled => "CANCELLED",
            ReflexError::Config(_) => "CONFIG_ERROR",
            ReflexError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn error_type(&self) -> &'static str {
        match &self.0 {
            ReflexError::Validation(_) => "ValidationError",
            ReflexError::RateLimited { .. } => "RateLimitExceeded",
            ReflexError::StoreUnavailable(_) => "UpstreamUnavailableError",
            ReflexError::DeadlineExceeded(_) => "UpstreamTimeoutError",
            ReflexError::Cancelled => "Cancelled",
            ReflexError::Config(_) | ReflexError::Internal(_) => "InternalError",
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.error_type().to_string(),
            message: self.0.to_string(),
            code: self.code().to_string(),
        };

        if status.is_server_error() {
            tracing::error!(code = %body.code, "Preprocess failed: {}", body.message);
        } else {
            tracing::debug!(code = %body.code, "Preprocess rejected: {}", body.message);
        }

        let mut response = (status, Json(body)).into_response();
        if let ReflexError::RateLimited { retry_after, .. } = &self.0 {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(*retry_after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Caller identity from the body, headers and socket
///
/// `X-Forwarded-For` is only read when `trust_forwarded_for` is set;
/// otherwise any client could pick its own address bucket.
pub fn caller_from(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    body_user: Option<String>,
    endpoint: &str,
    trust_forwarded_for: bool,
) -> Caller {
    let user_id = body_user.or_else(|| {
        headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });
    let forwarded = trust_forwarded_for
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let ip = forwarded.or_else(|| peer.map(|p| p.ip().to_string()));

    Caller {
        user_id,
        ip,
        endpoint: Some(endpoint.to_string()),
    }
}

#[derive(Clone)]
struct HttpState {
    pipeline: Arc<ReflexPipeline>,
    trust_forwarded_for: bool,
}

async fn preprocess(
    State(state): State<HttpState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<PreprocessBody>, JsonRejection>,
) -> Result<Json<PreprocessResult>, HttpError> {
    let Json(body) = body.map_err(|e| ReflexError::Validation(e.body_text()))?;
    let caller = caller_from(
        &headers,
        peer.map(|c| c.0),
        body.user_id,
        PREPROCESS_PATH,
        state.trust_forwarded_for,
    );
    let result = state.pipeline.process(body.request, &caller).await?;
    Ok(Json(result))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(State(state): State<HttpState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.pipeline.render_metrics(),
    )
}

/// Router serving the reflex pipeline
///
/// Set `trust_forwarded_for` only behind a proxy that rewrites
/// `X-Forwarded-For`.
pub fn router(pipeline: Arc<ReflexPipeline>, trust_forwarded_for: bool) -> Router {
    Router::new()
        .route(PREPROCESS_PATH, post(preprocess))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(HttpState {
            pipeline,
            trust_forwarded_for,
        })
}
