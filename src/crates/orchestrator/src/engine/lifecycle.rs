//! The per-task state loop

use chrono::Utc;
use reflex::ratelimit::Caller;
use reflex::{PreprocessRequest, PreprocessResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::integrate::{integrate, Usage};
use super::{Engine, TASKS_ENDPOINT};
use crate::client::{arm_dependency, ArmRequest, UpstreamError, REFLEX_DEPENDENCY};
use crate::db::{StepRecord, StepRepository, TaskRepository, TransitionUpdate};
use crate::router::select_arm;
use crate::task::{ResourceBudget, TaskContract};
use crate::{OrchestratorError, Result, TaskStatus};

impl Engine {
    /// Drive one task until it is terminal, cancelled or superseded
    pub(super) async fn drive(&self, mut task: TaskContract, token: CancellationToken) {
        let deadline = task_deadline(&task);
        let budget = task.budget;

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(OrchestratorError::Cancelled),
            result = tokio::time::timeout_at(deadline, self.run(&mut task, deadline)) => {
                result.unwrap_or_else(|_| Err(time_exhausted(&budget)))
            }
        };

        match outcome {
            Ok(()) => {}
            // The store already holds the terminal status
            Err(OrchestratorError::Cancelled) => debug!(
                task_id = %task.task_id,
                by_request = token.is_cancelled(),
                "Task drive stopped"
            ),
            Err(err) => self.fail(&mut task, err).await,
        }
    }

    async fn run(&self, task: &mut TaskContract, deadline: Instant) -> Result<()> {
        loop {
            match task.status {
                TaskStatus::Pending => {
                    self.advance(task, TaskStatus::Preprocessing, TransitionUpdate::default())
                        .await?
                }
                TaskStatus::Preprocessing => {
                    self.screen(task, deadline).await?;
                    let arms = self.route_plan(task)?;
                    self.advance(task, TaskStatus::Routed, TransitionUpdate::assigned(arms.join(",")))
                        .await?
                }
                TaskStatus::Routed => {
                    self.advance(task, TaskStatus::Executing, TransitionUpdate::default())
                        .await?
                }
                TaskStatus::Executing => {
                    self.execute(task, deadline).await?;
                    self.advance(task, TaskStatus::Integrating, TransitionUpdate::default())
                        .await?
                }
                TaskStatus::Integrating => {
                    let steps = StepRepository::completed(self.pool(), task.task_id).await?;
                    let result = integrate(task, &steps)?;
                    self.advance(task, TaskStatus::Completed, TransitionUpdate::result(result))
                        .await?
                }
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => return Ok(()),
            }
        }
    }

    /// Commit a transition, then mirror it on the in-memory contract
    ///
    /// A lost compare-and-set means another writer (a cancellation) moved
    /// the task; it surfaces as `Cancelled` and nothing more is written.
    async fn advance(&self, task: &mut TaskContract, next: TaskStatus, update: TransitionUpdate) -> Result<()> {
        let next = task.status.transition(next)?;
        let applied = TaskRepository::transition(self.pool(), task.task_id, task.status, next, &update).await?;
        if !applied {
            debug!(task_id = %task.task_id, from = %task.status, to = %next, "Transition superseded");
            return Err(OrchestratorError::Cancelled);
        }

        debug!(task_id = %task.task_id, from = %task.status, to = %next, "Task transitioned");
        task.status = next;
        task.updated_at = Utc::now();
        if update.assigned_arm.is_some() {
            task.assigned_arm = update.assigned_arm;
        }
        if update.reason.is_some() {
            task.reason = update.reason;
        }
        if update.result.is_some() {
            task.result = update.result;
        }

        if next.is_terminal() {
            self.metrics().record_terminal(next);
            if let Ok(elapsed) = (task.updated_at - task.created_at).to_std() {
                self.metrics().task_duration.observe(elapsed);
            }
            info!(task_id = %task.task_id, status = %next, "Task finished");
        }
        Ok(())
    }

    async fn fail(&self, task: &mut TaskContract, err: OrchestratorError) {
        let reason = err.reason();
        if err.is_transient() {
            warn!(task_id = %task.task_id, kind = err.kind(), "Task failed: {}", reason);
        } else {
            info!(task_id = %task.task_id, kind = err.kind(), "Task failed: {}", reason);
        }

        if !task.status.can_transition_to(TaskStatus::Failed) {
            error!(
                task_id = %task.task_id,
                status = %task.status,
                "Cannot record failure from this status, leaving task for recovery"
            );
            return;
        }
        match self.advance(task, TaskStatus::Failed, TransitionUpdate::reason(reason)).await {
            Ok(()) | Err(OrchestratorError::Cancelled) => {}
            Err(e) => error!(task_id = %task.task_id, "Failed to record task failure: {}", e),
        }
    }

    /// Screen the task text through the reflex tier
    async fn screen(&self, task: &TaskContract, deadline: Instant) -> Result<()> {
        let caller = task
            .owner
            .as_deref()
            .map(Caller::user)
            .unwrap_or_else(Caller::anonymous)
            .with_endpoint(TASKS_ENDPOINT);
        let request = PreprocessRequest::new(task.screening_text());
        let reflex = &self.inner.reflex;

        let verdict = self
            .resilient()
            .call(REFLEX_DEPENDENCY, Some(deadline), || {
                let reflex = Arc::clone(reflex);
                let request = request.clone();
                let caller = caller.clone();
                async move { reflex.preprocess(request, &caller).await }
            })
            .await
            .map_err(|e| upstream_failure(e, task, deadline))?;

        if verdict.safe {
            debug!(
                task_id = %task.task_id,
                risk_score = verdict.risk_score,
                cached = verdict.cached,
                degraded = verdict.degraded,
                "Task passed screening"
            );
            return Ok(());
        }

        Err(OrchestratorError::UnsafeContent {
            summary: summarize(&verdict),
            result: Box::new(verdict),
        })
    }

    /// Arm ids for the plan, in first-use order
    fn route_plan(&self, task: &TaskContract) -> Result<Vec<String>> {
        let snapshot = self.registry().snapshot();
        let mut arms: Vec<String> = Vec::new();
        for step in task.plan() {
            let arm = select_arm(&snapshot, &step.required_capabilities)?;
            if !arms.contains(&arm.arm_id) {
                arms.push(arm.arm_id.clone());
            }
        }
        Ok(arms)
    }

    /// Dispatch every step without a stored result, in plan order
    ///
    /// Each step is routed against the registry at dispatch time, so an arm
    /// that went unhealthy since routing is not called.
    async fn execute(&self, task: &TaskContract, deadline: Instant) -> Result<()> {
        let pool = self.pool();
        let done: BTreeMap<usize, StepRecord> = StepRepository::completed(pool, task.task_id)
            .await?
            .into_iter()
            .map(|step| (step.step_index, step))
            .collect();
        let mut usage = Usage::from_steps(done.values());

        for (index, step) in task.plan().into_iter().enumerate() {
            if done.contains_key(&index) {
                debug!(task_id = %task.task_id, step = index, "Step already done, skipping");
                continue;
            }

            let arm = self.registry().route(&step.required_capabilities)?;
            StepRepository::mark_dispatched(pool, task.task_id, index, &arm.arm_id).await?;

            let request = ArmRequest {
                task_id: task.task_id,
                step_index: index,
                goal: task.goal.clone(),
                instruction: step.description,
                constraints: task.constraints.clone(),
                context: task.context.clone(),
                acceptance_criteria: task.acceptance_criteria.clone(),
                capability_tags: step.required_capabilities,
                budget: usage.remaining(&task.budget, deadline.saturating_duration_since(Instant::now())),
            };
            let key = task.idempotency_key(index);
            let client = &self.inner.arms;

            let started = Instant::now();
            let outcome = self
                .resilient()
                .call(&arm_dependency(&arm.arm_id), Some(deadline), || {
                    let client = Arc::clone(client);
                    let arm = arm.clone();
                    let request = request.clone();
                    let key = key.clone();
                    async move { client.execute(&arm, &request, &key).await }
                })
                .await;
            self.metrics().arm_calls.inc();
            self.metrics().arm_call_latency.observe(started.elapsed());

            let response = match outcome {
                Ok(response) => response,
                Err(e) => {
                    let err = upstream_failure(e, task, deadline);
                    StepRepository::mark_failed(pool, task.task_id, index, &err.reason()).await?;
                    return Err(err);
                }
            };

            StepRepository::mark_done(
                pool,
                task.task_id,
                index,
                &response.output,
                response.tokens_used,
                response.cost_units,
                &response.criteria_met,
            )
            .await?;
            info!(
                task_id = %task.task_id,
                step = index,
                arm_id = %arm.arm_id,
                tokens = response.tokens_used,
                "Step completed"
            );

            usage.add(response.tokens_used, response.cost_units);
            usage.check(&task.budget)?;
        }
        Ok(())
    }
}

fn time_exhausted(budget: &ResourceBudget) -> OrchestratorError {
    OrchestratorError::BudgetExceeded(format!("max_time_seconds of {} elapsed", budget.max_time_seconds))
}

/// A call cut short by the task deadline is a budget failure, not an
/// upstream one
fn upstream_failure(err: UpstreamError, task: &TaskContract, deadline: Instant) -> OrchestratorError {
    match err {
        UpstreamError::Timeout(_) if Instant::now() >= deadline => time_exhausted(&task.budget),
        other => other.into(),
    }
}

/// Deadline of the whole drive; time spent before a restart counts
fn task_deadline(task: &TaskContract) -> Instant {
    let spent = (Utc::now() - task.created_at).to_std().unwrap_or_default();
    Instant::now() + task.budget.max_time().saturating_sub(spent)
}

/// Finding summary for the failure reason; never contains matched text
pub(crate) fn summarize(verdict: &PreprocessResult) -> String {
    let mut parts = Vec::new();
    if !verdict.pii_findings.is_empty() {
        let kinds: BTreeSet<String> = verdict.pii_findings.iter().map(|f| f.pii_type.to_string()).collect();
        parts.push(format!(
            "{} PII finding(s) [{}]",
            verdict.pii_findings.len(),
            kinds.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }
    if !verdict.injection_findings.is_empty() {
        let kinds: BTreeSet<String> = verdict
            .injection_findings
            .iter()
            .map(|f| f.pattern_id.to_string())
            .collect();
        parts.push(format!(
            "{} injection finding(s) [{}]",
            verdict.injection_findings.len(),
            kinds.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }
    if parts.is_empty() {
        parts.push("flagged by the reflex tier".to_string());
    }
    format!("{} (risk score {})", parts.join("; "), verdict.risk_score)
}
