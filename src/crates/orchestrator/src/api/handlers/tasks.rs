//! Task endpoint handlers

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use reflex::http::USER_HEADER;
use uuid::Uuid;

use crate::api::{
    error::{ApiError, ApiResult},
    models::{CreateTaskResponse, TaskDetailResponse, TaskListQuery, TaskListResponse},
    routes::AppState,
};
use crate::task::NewTask;

fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid task id: {}", raw)))
}

fn owner_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Accept a task and start driving it
///
/// POST /tasks
pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NewTask>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(new) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let task = state.engine.submit(new, owner_from(&headers)).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            task_id: task.task_id,
            status: task.status,
        }),
    ))
}

/// GET /tasks?status=&limit=
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Json<TaskListResponse>> {
    let tasks = state.engine.list(query.status()?, query.limit()?).await?;
    Ok(Json(tasks.into()))
}

/// GET /tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskDetailResponse>> {
    let id = parse_id(&id)?;
    let task = state.engine.get(id).await?;
    let steps = state.engine.steps(id).await?;
    let transitions = state.engine.transitions(id).await?;

    Ok(Json(TaskDetailResponse {
        task,
        steps,
        transitions,
    }))
}

/// POST /tasks/:id/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state.engine.cancel(parse_id(&id)?).await?;
    Ok(Json(CreateTaskResponse {
        task_id: task.task_id,
        status: task.status,
    }))
}
