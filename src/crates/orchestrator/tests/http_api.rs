//! HTTP routes driven through `tower::ServiceExt::oneshot`

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{answer, harness, Harness, WAIT};
use orchestrator::api::{create_router, ApiErrorResponse};
use orchestrator::TaskStatus;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()));
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", "alice")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn app() -> (Harness, Router) {
    let h = harness().await;
    let router = create_router(h.engine.clone());
    (h, router)
}

#[tokio::test]
async fn test_submit_then_fetch_completed_task() {
    let (h, app) = app().await;
    h.arms.respond("coder", Ok(answer(json!("patched"), 30, &["compiles"])));

    let (status, body) = send(
        &app,
        post_json(
            "/tasks",
            json!({
                "goal": "Fix the flaky test",
                "required_capabilities": ["code"],
                "acceptance_criteria": ["compiles"],
                "budget": {"max_tokens": 1000, "max_time_seconds": 60, "max_cost_units": 1.0}
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    let id: Uuid = body["task_id"].as_str().unwrap().parse().unwrap();

    h.engine.wait_terminal(id, WAIT).await.unwrap();

    let (status, body) = send(&app, get(&format!("/tasks/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["owner"], "alice");
    assert_eq!(body["result"]["output"], "patched");
    assert_eq!(body["steps"][0]["arm_id"], "coder");
    assert_eq!(body["transitions"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_invalid_submission_is_400() {
    let (_h, app) = app().await;

    let (status, body) = send(&app, post_json("/tasks", json!({"goal": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err: ApiErrorResponse = serde_json::from_value(body).unwrap();
    assert_eq!(err.error, "ValidationError");
    assert_eq!(err.code, "VALIDATION_ERROR");

    let (status, body) = send(&app, post_json("/tasks", json!({"constraints": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_unknown_and_malformed_ids() {
    let (_h, app) = app().await;

    let (status, body) = send(&app, get(&format!("/tasks/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "TaskNotFoundError");

    let (status, _) = send(&app, get("/tasks/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_endpoint_and_conflict() {
    let (h, app) = app().await;
    h.arms.set_delay(std::time::Duration::from_secs(5));

    let (_, body) = send(
        &app,
        post_json("/tasks", json!({"goal": "Long job", "required_capabilities": ["code"]})),
    )
    .await;
    let id: Uuid = body["task_id"].as_str().unwrap().parse().unwrap();
    common::wait_for_status(&h.engine, id, TaskStatus::Executing).await;

    let (status, body) = send(&app, post_json(&format!("/tasks/{}/cancel", id), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send(&app, post_json(&format!("/tasks/{}/cancel", id), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "InvalidTransitionError");
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let (h, app) = app().await;

    let (_, body) = send(
        &app,
        post_json("/tasks", json!({"goal": "Needs sql", "required_capabilities": ["sql"]})),
    )
    .await;
    let id: Uuid = body["task_id"].as_str().unwrap().parse().unwrap();
    h.engine.wait_terminal(id, WAIT).await.unwrap();

    let (status, body) = send(&app, get("/tasks?status=failed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["tasks"][0]["task_id"], id.to_string());

    let (_, body) = send(&app, get("/tasks?status=completed")).await;
    assert_eq!(body["count"], 0);

    let (status, _) = send(&app, get("/tasks?status=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_preprocess_endpoint() {
    let (_h, app) = app().await;

    let (status, body) = send(
        &app,
        post_json(
            "/preprocess",
            json!({"text": "Email me at jane.doe@example.com", "check_pii": true, "check_injection": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["safe"], false);
    assert_eq!(body["pii_findings"][0]["type"], "EMAIL");

    let (status, body) = send(&app, post_json("/preprocess", json!({"text": "What is the weather?"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["safe"], true);

    let (status, body) = send(&app, post_json("/preprocess", json!({"text": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationError");
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (_h, app) = app().await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["arms"], 3);

    send(&app, post_json("/preprocess", json!({"text": "hello there"}))).await;

    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let text = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(text.contains("orchestrator_tasks_submitted_total 0"));
    assert!(text.contains("reflex_"));
}
