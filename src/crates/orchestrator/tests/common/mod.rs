//! Shared helpers for orchestrator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use orchestrator::client::{
    ArmClient, ArmDescriptor, ArmRequest, ArmResponse, BreakerConfig, BreakerRegistry, LocalReflex, ResilientClient,
    UpstreamError,
};
use orchestrator::db::DatabaseConnection;
use orchestrator::router::{ArmCapability, ArmRegistry};
use orchestrator::{Engine, TaskContract, TaskStatus};
use parking_lot::Mutex;
use reflex::clock::SystemClock;
use reflex::store::Stores;
use reflex::{ReflexConfig, ReflexPipeline};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tooling::async_utils::RetryPolicy;
use uuid::Uuid;

pub const WAIT: Duration = Duration::from_secs(10);

/// One recorded `execute` call
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub arm_id: String,
    pub step_index: usize,
    pub idempotency_key: String,
    pub instruction: String,
}

/// Scripted arm backend
///
/// Each arm answers from its queue of one-shot responses first, then from
/// its standing response. Arms without either echo the instruction.
#[derive(Default)]
pub struct FakeArms {
    queued: Mutex<HashMap<String, VecDeque<Result<ArmResponse, UpstreamError>>>>,
    standing: Mutex<HashMap<String, Result<ArmResponse, UpstreamError>>>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl FakeArms {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, arm_id: &str, response: Result<ArmResponse, UpstreamError>) {
        self.standing.lock().insert(arm_id.to_string(), response);
    }

    pub fn then(&self, arm_id: &str, response: Result<ArmResponse, UpstreamError>) {
        self.queued
            .lock()
            .entry(arm_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ArmClient for FakeArms {
    async fn execute(
        &self,
        arm: &ArmCapability,
        request: &ArmRequest,
        idempotency_key: &str,
    ) -> Result<ArmResponse, UpstreamError> {
        self.calls.lock().push(Call {
            arm_id: arm.arm_id.clone(),
            step_index: request.step_index,
            idempotency_key: idempotency_key.to_string(),
            instruction: request.instruction.clone(),
        });

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queued
            .lock()
            .get_mut(&arm.arm_id)
            .and_then(VecDeque::pop_front);
        if let Some(response) = queued {
            return response;
        }
        if let Some(response) = self.standing.lock().get(&arm.arm_id) {
            return response.clone();
        }
        Ok(answer(Value::String(request.instruction.clone()), 10, &[]))
    }

    async fn capabilities(&self, endpoint: &str) -> Result<ArmDescriptor, UpstreamError> {
        Err(UpstreamError::Unavailable(format!("{} has no capability endpoint", endpoint)))
    }
}

pub fn answer(output: Value, tokens_used: u64, criteria_met: &[&str]) -> ArmResponse {
    ArmResponse {
        output,
        tokens_used,
        cost_units: 0.01,
        criteria_met: criteria_met.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn default_arms() -> Vec<ArmCapability> {
    vec![
        ArmCapability::new("coder", &["code", "python"], 2, "http://coder.local"),
        ArmCapability::new("reviewer", &["review"], 1, "http://reviewer.local"),
        ArmCapability::new("premium-coder", &["code", "python"], 4, "http://premium.local"),
    ]
}

/// Deadline loose enough for debug builds
pub fn reflex_config() -> ReflexConfig {
    ReflexConfig {
        pipeline_deadline_ms: 10_000,
        coalesce_wait_ms: 5_000,
        ..ReflexConfig::default()
    }
}

pub struct Harness {
    pub engine: Engine,
    pub arms: Arc<FakeArms>,
}

pub struct HarnessBuilder {
    database_url: String,
    arms: Vec<ArmCapability>,
    breaker: BreakerConfig,
    retry: RetryPolicy,
    fake: Arc<FakeArms>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            arms: default_arms(),
            breaker: BreakerConfig::default(),
            retry: RetryPolicy::new(1),
            fake: FakeArms::new(),
        }
    }

    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn arms(mut self, arms: Vec<ArmCapability>) -> Self {
        self.arms = arms;
        self
    }

    pub fn breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.breaker = BreakerConfig { threshold, cooldown };
        self
    }

    pub fn retries(mut self, attempts: usize) -> Self {
        self.retry = RetryPolicy::new(attempts)
            .with_initial_interval(Duration::from_millis(5))
            .with_max_interval(Duration::from_millis(20))
            .with_jitter(false);
        self
    }

    pub fn fake(mut self, fake: Arc<FakeArms>) -> Self {
        self.fake = fake;
        self
    }

    pub async fn build(self) -> Harness {
        let db = DatabaseConnection::open(&self.database_url, 5).await.unwrap();
        let config = reflex_config();
        let pipeline = ReflexPipeline::new(&config, Stores::memory(), Arc::new(SystemClock));
        let registry = Arc::new(ArmRegistry::new(self.arms).unwrap());
        let resilient = ResilientClient::new(Arc::new(BreakerRegistry::new(self.breaker)), self.retry);

        let engine = Engine::new(
            db,
            Arc::new(LocalReflex::new(Arc::new(pipeline))),
            self.fake.clone(),
            registry,
            resilient,
        );
        Harness {
            engine,
            arms: self.fake,
        }
    }
}

pub async fn harness() -> Harness {
    HarnessBuilder::new().build().await
}

/// Poll until the task reaches `status`
pub async fn wait_for_status(engine: &Engine, id: Uuid, status: TaskStatus) -> TaskContract {
    let give_up = tokio::time::Instant::now() + WAIT;
    loop {
        let task = engine.get(id).await.unwrap();
        if task.status == status {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < give_up,
            "task {} stuck in {}, waiting for {}",
            id,
            task.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
