//! Liveness and metrics handlers

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::api::{models::HealthResponse, routes::AppState};

/// GET /health
///
/// 200 while the task store answers, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, code, database) = match state.engine.database().health_check().await {
        Ok(()) => ("ok", StatusCode::OK, "connected"),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            ("error", StatusCode::SERVICE_UNAVAILABLE, "error")
        }
    };

    let body = HealthResponse {
        status: status.to_string(),
        database: database.to_string(),
        version: crate::version().to_string(),
        in_flight: state.engine.in_flight(),
        arms: state.engine.registry().len(),
    };
    (code, Json(body))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.engine.render_metrics(),
    )
}
