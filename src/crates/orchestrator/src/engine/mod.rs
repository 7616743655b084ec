//! Orchestrator core
//!
//! Each accepted task is driven by its own tokio task through
//! `pending → preprocessing → routed → executing → integrating → completed`.
//! Every transition is committed to the task store before the work of the
//! new state starts, so a restarted process resumes each non-terminal task
//! from its last persisted state.

mod integrate;
mod lifecycle;

pub use integrate::{integrate, Usage};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reflex::ReflexPipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::client::{
    ArmClient, BreakerRegistry, HttpArmClient, HttpReflexClient, LocalReflex, ReflexGateway, ResilientClient,
};
use crate::config::OrchestratorConfig;
use crate::db::{
    DatabaseConnection, DatabasePool, StepRecord, StepRepository, TaskRepository, TransitionRecord, TransitionUpdate,
};
use crate::metrics::{OrchestratorMetrics, RenderContext};
use crate::router::ArmRegistry;
use crate::task::{NewTask, TaskContract};
use crate::{OrchestratorError, Result, TaskStatus};

/// Reason stored on tasks cancelled through the API
pub const CANCEL_REASON: &str = "Cancelled: cancelled by request";

/// Endpoint name the reflex rate limiter sees for task screening
pub const TASKS_ENDPOINT: &str = "/tasks";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Inner {
    db: DatabaseConnection,
    reflex: Arc<dyn ReflexGateway>,
    arms: Arc<dyn ArmClient>,
    registry: Arc<ArmRegistry>,
    resilient: ResilientClient,
    metrics: OrchestratorMetrics,
    /// Tasks driven by this process
    running: DashMap<Uuid, CancellationToken>,
}

/// Handle to the orchestrator; cheap to clone
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new(
        db: DatabaseConnection,
        reflex: Arc<dyn ReflexGateway>,
        arms: Arc<dyn ArmClient>,
        registry: Arc<ArmRegistry>,
        resilient: ResilientClient,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                reflex,
                arms,
                registry,
                resilient,
                metrics: OrchestratorMetrics::default(),
                running: DashMap::new(),
            }),
        }
    }

    /// Wire every collaborator from configuration
    pub async fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let db = DatabaseConnection::open(&config.database.url, config.database.max_connections).await?;
        let timeout = config.resilience.request_timeout();

        let reflex: Arc<dyn ReflexGateway> = match &config.reflex.remote_url {
            Some(url) => {
                info!(url = %url, "Using remote reflex tier");
                Arc::new(HttpReflexClient::new(url, timeout)?)
            }
            None => {
                let pipeline = ReflexPipeline::from_config(config.reflex.clone())
                    .await
                    .map_err(|e| OrchestratorError::Config(e.to_string()))?;
                Arc::new(LocalReflex::new(Arc::new(pipeline)))
            }
        };

        let arms = Arc::new(HttpArmClient::new(timeout)?);
        let registry = Arc::new(config.arms.build_registry()?);
        let breakers = Arc::new(BreakerRegistry::new(config.resilience.breaker_config()));
        let resilient = ResilientClient::new(breakers, config.resilience.retry_policy());

        info!(arms = registry.len(), "Engine ready");
        Ok(Self::new(db, reflex, arms, registry, resilient))
    }

    pub fn pool(&self) -> &DatabasePool {
        self.inner.db.pool()
    }

    pub fn database(&self) -> &DatabaseConnection {
        &self.inner.db
    }

    pub fn registry(&self) -> &Arc<ArmRegistry> {
        &self.inner.registry
    }

    pub fn reflex(&self) -> &Arc<dyn ReflexGateway> {
        &self.inner.reflex
    }

    pub fn arm_client(&self) -> &Arc<dyn ArmClient> {
        &self.inner.arms
    }

    pub fn resilient(&self) -> &ResilientClient {
        &self.inner.resilient
    }

    pub fn metrics(&self) -> &OrchestratorMetrics {
        &self.inner.metrics
    }

    /// Validate, persist as `pending` and start driving a new task
    pub async fn submit(&self, new: NewTask, owner: Option<String>) -> Result<TaskContract> {
        let task = TaskContract::accept(new, owner)?;
        TaskRepository::create(self.pool(), &task).await?;
        self.inner.metrics.submitted.inc();
        info!(
            task_id = %task.task_id,
            priority = task.priority.as_str(),
            steps = task.plan().len(),
            "Task accepted"
        );

        self.spawn(task.clone());
        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<TaskContract> {
        TaskRepository::get(self.pool(), id)
            .await?
            .ok_or(OrchestratorError::TaskNotFound(id))
    }

    pub async fn list(&self, status: Option<TaskStatus>, limit: u32) -> Result<Vec<TaskContract>> {
        Ok(TaskRepository::list(self.pool(), status, limit).await?)
    }

    pub async fn transitions(&self, id: Uuid) -> Result<Vec<TransitionRecord>> {
        Ok(TaskRepository::transitions(self.pool(), id).await?)
    }

    pub async fn steps(&self, id: Uuid) -> Result<Vec<StepRecord>> {
        Ok(StepRepository::list(self.pool(), id).await?)
    }

    /// Move a non-terminal task to `cancelled` and abort its in-flight work
    ///
    /// The cancellation is committed first; the driving task notices through
    /// its token or through its next compare-and-set.
    pub async fn cancel(&self, id: Uuid) -> Result<TaskContract> {
        let mut last = TaskStatus::Pending;
        // Statuses only move forward, so the loop is bounded by their count
        for _ in 0..TaskStatus::ALL.len() {
            let task = self.get(id).await?;
            last = task.status;
            let next = task.status.transition(TaskStatus::Cancelled)?;
            let applied = TaskRepository::transition(
                self.pool(),
                id,
                task.status,
                next,
                &TransitionUpdate::reason(CANCEL_REASON),
            )
            .await?;

            if applied {
                self.inner.metrics.record_terminal(TaskStatus::Cancelled);
                if let Some(token) = self.inner.running.get(&id) {
                    token.cancel();
                }
                info!(task_id = %id, from = %task.status, "Task cancelled");
                return self.get(id).await;
            }
        }

        Err(OrchestratorError::InvalidTransition {
            from: last,
            to: TaskStatus::Cancelled,
        })
    }

    /// Resume every non-terminal task found in the store
    pub async fn recover(&self) -> Result<usize> {
        let tasks = TaskRepository::list_non_terminal(self.pool()).await?;
        let mut resumed = 0;
        for task in tasks {
            info!(task_id = %task.task_id, status = %task.status, "Resuming task");
            if self.spawn(task) {
                self.inner.metrics.recovered.inc();
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Poll until the task is terminal or `timeout` elapses
    pub async fn wait_terminal(&self, id: Uuid, timeout: Duration) -> Result<TaskContract> {
        let give_up = Instant::now() + timeout;
        loop {
            let task = self.get(id).await?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            if Instant::now() >= give_up {
                return Err(OrchestratorError::UpstreamTimeout(format!(
                    "task {} still {} after {}ms",
                    id,
                    task.status,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Number of tasks driven by this process right now
    pub fn in_flight(&self) -> usize {
        self.inner.running.len()
    }

    pub fn render_metrics(&self) -> String {
        let resilient = &self.inner.resilient;
        self.inner.metrics.render(&RenderContext {
            breakers: resilient.breakers().snapshot(),
            retries: resilient.retries(),
            short_circuits: resilient.short_circuits(),
            reflex: self.inner.reflex.render_metrics(),
        })
    }

    /// Start driving `task` unless this process already is
    fn spawn(&self, task: TaskContract) -> bool {
        let token = match self.inner.running.entry(task.task_id) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => slot.insert(CancellationToken::new()).clone(),
        };

        let engine = self.clone();
        tokio::spawn(async move {
            let id = task.task_id;
            engine.drive(task, token).await;
            engine.inner.running.remove(&id);
        });
        true
    }
}
