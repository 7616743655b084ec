//! API route definitions

use axum::{
    routing::{get, post},
    Router,
};
use reflex::http::PREPROCESS_PATH;

use crate::api::{handlers, middleware};
use crate::engine::Engine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,

    /// Read client addresses from `X-Forwarded-For`
    pub trust_forwarded_for: bool,
}

/// Build the complete API router, ignoring `X-Forwarded-For`
pub fn create_router(engine: Engine) -> Router {
    router_with_state(AppState {
        engine,
        trust_forwarded_for: false,
    })
}

pub fn router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(PREPROCESS_PATH, post(handlers::preprocess))
        .route("/tasks", post(handlers::create_task).get(handlers::list_tasks))
        .route("/tasks/:id", get(handlers::get_task))
        .route("/tasks/:id/cancel", post(handlers::cancel_task))
        .layer(middleware::logging_layer())
        .layer(middleware::cors_layer())
        .with_state(state)
}
