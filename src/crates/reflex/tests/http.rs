//! HTTP surface of the reflex service

mod common;

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use common::{memory_pipeline, test_config};
use reflex::http::{router, ErrorBody};
use reflex::{PreprocessResult, ReflexConfig};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

fn preprocess_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/preprocess")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

#[tokio::test]
async fn test_preprocess_reports_ssn() {
    let (pipeline, _) = memory_pipeline(test_config());
    let app = router(Arc::new(pipeline), false);

    let response = app
        .oneshot(preprocess_request(json!({
            "text": "My SSN is 123-45-6789",
            "user_id": "alice",
            "redact": "token"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let result: PreprocessResult = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(!result.safe);
    assert_eq!(result.pii_findings.len(), 1);
    assert_eq!(result.redacted_text.as_deref(), Some("My SSN is [SSN_1]"));
}

#[tokio::test]
async fn test_empty_text_is_bad_request() {
    let (pipeline, _) = memory_pipeline(test_config());
    let app = router(Arc::new(pipeline), false);

    let response = app
        .oneshot(preprocess_request(json!({ "text": "   " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: ErrorBody = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body.code, "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_rate_limited_response_carries_retry_after() {
    let config = ReflexConfig {
        rate_limit_per_user: 1,
        ..test_config()
    };
    let (pipeline, _) = memory_pipeline(config);
    let app = router(Arc::new(pipeline), false);

    let first = app
        .clone()
        .oneshot(preprocess_request(json!({ "text": "first", "user_id": "bob" })))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/preprocess")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-user-id", "bob")
                .body(Body::from(json!({ "text": "second" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = second
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);

    let body: ErrorBody = serde_json::from_slice(&body_bytes(second).await).unwrap();
    assert_eq!(body.code, "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (pipeline, _) = memory_pipeline(test_config());
    let app = router(Arc::new(pipeline), false);

    let health = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body_bytes(health).await).unwrap();
    assert_eq!(health["status"], "ok");

    app.clone()
        .oneshot(preprocess_request(json!({ "text": "hello" })))
        .await
        .unwrap();

    let metrics = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(metrics).await).unwrap();
    assert!(text.contains("reflex_requests_total 1"));
    assert!(text.contains("reflex_cache_misses_total"));
}

fn forwarded_request(text: &str, forwarded_for: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/preprocess")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", forwarded_for)
        .body(Body::from(json!({ "text": text }).to_string()))
        .unwrap();
    let peer: SocketAddr = "192.168.7.7:51000".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

async fn statuses_from_one_socket(trust_forwarded_for: bool) -> Vec<StatusCode> {
    let config = ReflexConfig {
        rate_limit_per_user: 0,
        rate_limit_per_ip: 1,
        ..test_config()
    };
    let (pipeline, _) = memory_pipeline(config);
    let app = router(Arc::new(pipeline), trust_forwarded_for);

    let mut statuses = Vec::new();
    for i in 0..5 {
        let response = app
            .clone()
            .oneshot(forwarded_request(&format!("message {}", i), &format!("203.0.113.{}", i)))
            .await
            .unwrap();
        statuses.push(response.status());
    }
    statuses
}

#[tokio::test]
async fn test_spoofed_forwarded_for_shares_socket_bucket() {
    let statuses = statuses_from_one_socket(false).await;
    assert_eq!(statuses[0], StatusCode::OK);
    assert!(statuses[1..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
}

#[tokio::test]
async fn test_trusted_forwarded_for_splits_buckets() {
    let statuses = statuses_from_one_socket(true).await;
    assert!(statuses.iter().all(|s| *s == StatusCode::OK));
}

#[tokio::test]
async fn test_malformed_body_gets_error_body() {
    let (pipeline, _) = memory_pipeline(test_config());
    let app = router(Arc::new(pipeline), false);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/preprocess")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"text\": "))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body.error, "ValidationError");
    assert_eq!(body.code, "VALIDATION_ERROR");
    assert!(!body.message.is_empty());

    // Well-formed JSON missing `text`
    let response = app
        .oneshot(preprocess_request(json!({ "user_id": "alice" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body.code, "VALIDATION_ERROR");
}
