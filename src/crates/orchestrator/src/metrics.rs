//! Orchestrator counters and their Prometheus rendering

use tooling::metrics::{Counter, Histogram, PromWriter};

use crate::client::CircuitBreakerState;
use crate::TaskStatus;

/// Task durations run from seconds to an hour
const TASK_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0];

#[derive(Debug, Clone)]
pub struct OrchestratorMetrics {
    pub submitted: Counter,
    pub completed: Counter,
    pub failed: Counter,
    pub cancelled: Counter,
    /// Tasks resumed after a restart
    pub recovered: Counter,
    pub arm_calls: Counter,
    pub arm_call_latency: Histogram,
    pub task_duration: Histogram,
}

impl Default for OrchestratorMetrics {
    fn default() -> Self {
        Self {
            submitted: Counter::new(),
            completed: Counter::new(),
            failed: Counter::new(),
            cancelled: Counter::new(),
            recovered: Counter::new(),
            arm_calls: Counter::new(),
            arm_call_latency: Histogram::latency(),
            task_duration: Histogram::new(TASK_DURATION_BUCKETS),
        }
    }
}

/// Values read at render time
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub breakers: Vec<(String, CircuitBreakerState)>,
    pub retries: u64,
    pub short_circuits: u64,
    /// Text of an in-process reflex pipeline
    pub reflex: Option<String>,
}

impl OrchestratorMetrics {
    pub fn record_terminal(&self, status: TaskStatus) {
        match status {
            TaskStatus::Completed => self.completed.inc(),
            TaskStatus::Failed => self.failed.inc(),
            TaskStatus::Cancelled => self.cancelled.inc(),
            _ => {}
        }
    }

    pub fn render(&self, ctx: &RenderContext) -> String {
        let mut out = PromWriter::new();
        out.counter(
            "orchestrator_tasks_submitted_total",
            "Tasks accepted",
            self.submitted.get(),
        )
        .counter_family(
            "orchestrator_tasks_finished_total",
            "Tasks that reached a terminal status",
            [
                (TaskStatus::Completed, self.completed.get()),
                (TaskStatus::Failed, self.failed.get()),
                (TaskStatus::Cancelled, self.cancelled.get()),
            ]
            .into_iter()
            .map(|(status, n)| (vec![("status", status.as_str().to_string())], n)),
        )
        .counter(
            "orchestrator_tasks_recovered_total",
            "Non-terminal tasks resumed at startup",
            self.recovered.get(),
        )
        .histogram(
            "orchestrator_task_duration_seconds",
            "Submission to terminal status",
            &self.task_duration.snapshot(),
        )
        .counter("orchestrator_arm_calls_total", "Arm execute calls", self.arm_calls.get())
        .histogram(
            "orchestrator_arm_call_duration_seconds",
            "Arm execute latency including retries",
            &self.arm_call_latency.snapshot(),
        )
        .counter(
            "orchestrator_upstream_retries_total",
            "Retried outbound calls",
            ctx.retries,
        )
        .counter(
            "orchestrator_circuit_short_circuits_total",
            "Calls refused by an open circuit",
            ctx.short_circuits,
        )
        .gauge_family(
            "orchestrator_circuit_breaker_state",
            "0 closed, 1 half-open, 2 open",
            ctx.breakers
                .iter()
                .map(|(name, state)| (vec![("dependency", name.clone())], state.status.gauge_value())),
        );

        if let Some(reflex) = &ctx.reflex {
            out.extend(reflex);
        }
        out.finish()
    }
}
