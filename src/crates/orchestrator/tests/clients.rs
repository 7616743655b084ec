//! HTTP clients against wiremock servers

use orchestrator::client::{
    ArmClient, ArmRequest, BreakerConfig, BreakerRegistry, HttpArmClient, HttpReflexClient, ReflexGateway,
    ResilientClient, UpstreamError, IDEMPOTENCY_HEADER,
};
use orchestrator::router::{ArmCapability, ArmRegistry, HealthStatus};
use orchestrator::ResourceBudget;
use reflex::ratelimit::Caller;
use reflex::{PreprocessRequest, PreprocessResult};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tooling::async_utils::RetryPolicy;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(step_index: usize) -> ArmRequest {
    ArmRequest {
        task_id: Uuid::new_v4(),
        step_index,
        goal: "Fix the pager".into(),
        instruction: "write the patch".into(),
        constraints: vec![],
        context: Default::default(),
        acceptance_criteria: vec!["compiles".into()],
        capability_tags: ["code".to_string()].into_iter().collect(),
        budget: ResourceBudget::default(),
    }
}

fn client() -> HttpArmClient {
    HttpArmClient::new(Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_execute_sends_idempotency_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(header(IDEMPOTENCY_HEADER, "task-1:0"))
        .and(body_partial_json(json!({"instruction": "write the patch", "step_index": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": {"diff": "+1"},
            "tokens_used": 42,
            "cost_units": 0.05,
            "criteria_met": ["compiles"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let arm = ArmCapability::new("coder", &["code"], 1, server.uri());
    let response = client().execute(&arm, &request(0), "task-1:0").await.unwrap();
    assert_eq!(response.output, json!({"diff": "+1"}));
    assert_eq!(response.tokens_used, 42);
    assert_eq!(response.criteria_met, vec!["compiles".to_string()]);
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let server = MockServer::start().await;
    let arm = ArmCapability::new("coder", &["code"], 1, server.uri());

    Mock::given(path("/execute"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "instruction too long"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let err = client().execute(&arm, &request(0), "k").await.unwrap_err();
    assert_eq!(err, UpstreamError::Rejected("HTTP 400: instruction too long".into()));
    assert!(!err.is_retryable());

    Mock::given(path("/execute"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let err = client().execute(&arm, &request(0), "k").await.unwrap_err();
    assert_eq!(
        err,
        UpstreamError::RateLimited {
            retry_after: Duration::from_secs(7)
        }
    );

    Mock::given(path("/execute"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let err = client().execute(&arm, &request(0), "k").await.unwrap_err();
    assert!(matches!(err, UpstreamError::Status { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_slow_arm_times_out() {
    let server = MockServer::start().await;
    Mock::given(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let arm = ArmCapability::new("coder", &["code"], 1, server.uri());
    let client = HttpArmClient::new(Duration::from_millis(100)).unwrap();
    let err = client.execute(&arm, &request(0), "k").await.unwrap_err();
    assert!(matches!(err, UpstreamError::Timeout(_)), "{:?}", err);
}

#[tokio::test]
async fn test_resilient_client_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(path("/execute"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": "ok"})))
        .mount(&server)
        .await;

    let arm = ArmCapability::new("coder", &["code"], 1, server.uri());
    let http = client();
    let resilient = ResilientClient::new(
        Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        RetryPolicy::new(3)
            .with_initial_interval(Duration::from_millis(10))
            .with_jitter(false),
    );
    let req = request(0);

    let response = resilient
        .call("arm:coder", None, || http.execute(&arm, &req, "k"))
        .await
        .unwrap();
    assert_eq!(response.output, json!("ok"));
    assert_eq!(resilient.retries(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_capability_refresh_updates_registry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "arm_id": "coder",
            "capability_tags": ["code", "rust"],
            "cost_tier": 3
        })))
        .mount(&server)
        .await;

    let registry = ArmRegistry::new(vec![
        ArmCapability::new("coder", &["code"], 1, server.uri()),
        ArmCapability::new("ghost", &["code"], 1, "http://127.0.0.1:9"),
    ])
    .unwrap();

    let healthy = registry.refresh(&client()).await;
    assert_eq!(healthy, 1);

    let coder = registry.get("coder").unwrap();
    assert!(coder.offers(&["rust".to_string()].into_iter().collect()));
    assert_eq!(coder.cost_tier, 3);
    assert_eq!(registry.get("ghost").unwrap().health_status, HealthStatus::Unavailable);
}

#[tokio::test]
async fn test_remote_reflex_client() {
    let server = MockServer::start().await;
    let verdict = PreprocessResult {
        safe: true,
        risk_score: 0,
        ..PreprocessResult::default()
    };
    Mock::given(method("POST"))
        .and(path("/preprocess"))
        .and(header("x-forwarded-for", "10.0.0.7"))
        .and(body_partial_json(json!({"text": "hello", "user_id": "alice"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(&verdict))
        .mount(&server)
        .await;

    let reflex = HttpReflexClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
    let caller = Caller::user("alice").with_ip("10.0.0.7");
    let result = reflex.preprocess(PreprocessRequest::new("hello"), &caller).await.unwrap();
    assert!(result.safe);
    assert!(reflex.render_metrics().is_none());
}

#[tokio::test]
async fn test_remote_reflex_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(path("/preprocess"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "36")
                .set_body_json(json!({"error": "RateLimitExceeded", "message": "slow down", "code": "RATE_LIMIT_EXCEEDED"})),
        )
        .mount(&server)
        .await;

    let reflex = HttpReflexClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
    let err = reflex
        .preprocess(PreprocessRequest::new("hello"), &Caller::anonymous())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        UpstreamError::RateLimited {
            retry_after: Duration::from_secs(36)
        }
    );
}
