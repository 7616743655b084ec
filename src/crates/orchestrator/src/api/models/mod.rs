//! API request and response bodies

pub mod task;

pub use task::{CreateTaskResponse, TaskDetailResponse, TaskListQuery, TaskListResponse};

use serde::{Deserialize, Serialize};

/// Liveness and readiness summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status
    pub status: String,

    /// Database connection status
    pub database: String,

    /// API version
    pub version: String,

    /// Tasks driven by this process
    pub in_flight: usize,

    /// Registered arms
    pub arms: usize,
}
