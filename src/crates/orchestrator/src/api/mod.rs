//! HTTP surface of the orchestrator
//!
//! - `POST /preprocess` screens text through the reflex tier
//! - `POST /tasks`, `GET /tasks`, `GET /tasks/:id`, `POST /tasks/:id/cancel`
//! - `GET /health` and `GET /metrics`

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;

pub use error::{ApiError, ApiErrorResponse, ApiResult};
pub use routes::{create_router, router_with_state, AppState};
