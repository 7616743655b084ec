//! Screening endpoint backed by the engine's reflex gateway

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use reflex::http::{caller_from, PreprocessBody, PREPROCESS_PATH};
use reflex::PreprocessResult;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::api::{
    error::{ApiError, ApiResult},
    routes::AppState,
};
use crate::client::REFLEX_DEPENDENCY;

/// POST /preprocess
pub async fn preprocess(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<PreprocessBody>, JsonRejection>,
) -> ApiResult<Json<PreprocessResult>> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let caller = caller_from(
        &headers,
        peer.map(|c| c.0),
        body.user_id,
        PREPROCESS_PATH,
        state.trust_forwarded_for,
    );
    let request = body.request;
    let reflex = state.engine.reflex();

    let result = state
        .engine
        .resilient()
        .call(REFLEX_DEPENDENCY, None, || {
            let reflex = Arc::clone(reflex);
            let request = request.clone();
            let caller = caller.clone();
            async move { reflex.preprocess(request, &caller).await }
        })
        .await?;
    Ok(Json(result))
}
