//! Task API models
//!
//! Submissions deserialize straight into [`NewTask`](crate::task::NewTask);
//! these are the bodies around it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::db::{StepRecord, TransitionRecord};
use crate::task::TaskContract;
use crate::TaskStatus;

pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const MAX_LIST_LIMIT: u32 = 500;

/// Body of `POST /tasks`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

/// Query of `GET /tasks`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

impl TaskListQuery {
    pub fn status(&self) -> ApiResult<Option<TaskStatus>> {
        self.status
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(ApiError::from)
    }

    pub fn limit(&self) -> ApiResult<u32> {
        match self.limit.unwrap_or(DEFAULT_LIST_LIMIT) {
            0 => Err(ApiError::BadRequest("limit must be greater than 0".into())),
            n if n > MAX_LIST_LIMIT => Err(ApiError::BadRequest(format!(
                "limit cannot exceed {}",
                MAX_LIST_LIMIT
            ))),
            n => Ok(n),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskContract>,
    pub count: usize,
}

impl From<Vec<TaskContract>> for TaskListResponse {
    fn from(tasks: Vec<TaskContract>) -> Self {
        Self {
            count: tasks.len(),
            tasks,
        }
    }
}

/// Full contract plus its step progress and transition log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: TaskContract,
    pub steps: Vec<StepRecord>,
    pub transitions: Vec<TransitionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_parsing() {
        let query = TaskListQuery {
            status: Some("Failed".into()),
            limit: None,
        };
        assert_eq!(query.status().unwrap(), Some(TaskStatus::Failed));
        assert_eq!(query.limit().unwrap(), DEFAULT_LIST_LIMIT);

        let query = TaskListQuery {
            status: Some("running".into()),
            limit: Some(0),
        };
        assert!(query.status().is_err());
        assert!(query.limit().is_err());
    }
}
