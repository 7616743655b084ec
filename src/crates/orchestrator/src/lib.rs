//! Task orchestration engine
//!
//! Drives task contracts through their lifecycle: screening by the reflex
//! tier, capability routing to downstream arms, resilient execution, result
//! integration and durable persistence of every transition.

pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod engine;
pub mod metrics;
pub mod router;
pub mod task;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::client::UpstreamError;
use crate::db::DatabaseError;

pub use engine::Engine;
pub use task::{NewTask, PlanStep, Priority, ResourceBudget, TaskContract, TaskResult};

/// Errors that can occur during orchestration
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The reflex tier flagged the input; carries the finding summary
    #[error("Unsafe content: {summary}")]
    UnsafeContent {
        summary: String,
        result: Box<reflex::PreprocessResult>,
    },

    #[error("Rate limit exceeded, retry after {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("Circuit open for {dependency}, retry after {}ms", retry_after.as_millis())]
    CircuitOpen {
        dependency: String,
        retry_after: Duration,
    },

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("No capable arm: {0}")]
    NoCapableArm(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Acceptance criteria not met: {0}")]
    AcceptanceCriteria(String),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    /// Taxonomy name surfaced in task reasons and API bodies
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "ValidationError",
            OrchestratorError::UnsafeContent { .. } => "UnsafeContentError",
            OrchestratorError::RateLimited { .. } => "RateLimitExceeded",
            OrchestratorError::CircuitOpen { .. } => "CircuitOpenError",
            OrchestratorError::UpstreamTimeout(_) => "UpstreamTimeoutError",
            OrchestratorError::UpstreamUnavailable(_) => "UpstreamUnavailableError",
            OrchestratorError::NoCapableArm(_) => "NoCapableArmError",
            OrchestratorError::Database(_) => "DatabaseError",
            OrchestratorError::InvalidTransition { .. } => "InvalidTransitionError",
            OrchestratorError::BudgetExceeded(_) => "BudgetExceededError",
            OrchestratorError::AcceptanceCriteria(_) => "AcceptanceCriteriaError",
            OrchestratorError::TaskNotFound(_) => "TaskNotFoundError",
            OrchestratorError::Cancelled => "Cancelled",
            OrchestratorError::Config(_) | OrchestratorError::Serialization(_) => "InternalError",
        }
    }

    /// Failures that may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestratorError::CircuitOpen { .. }
            | OrchestratorError::UpstreamTimeout(_)
            | OrchestratorError::UpstreamUnavailable(_)
            | OrchestratorError::RateLimited { .. } => true,
            OrchestratorError::Database(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Terminal reason stored on a failed task
    ///
    /// Always starts with the taxonomy name. Database and internal failures
    /// never leak their underlying message.
    pub fn reason(&self) -> String {
        match self {
            OrchestratorError::Database(_) => "DatabaseError: task store operation failed".to_string(),
            OrchestratorError::Config(_) | OrchestratorError::Serialization(_) => {
                "InternalError: internal failure".to_string()
            }
            other => format!("{}: {}", other.kind(), other),
        }
    }
}

impl From<UpstreamError> for OrchestratorError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout(msg) => OrchestratorError::UpstreamTimeout(msg),
            UpstreamError::Unavailable(msg) => OrchestratorError::UpstreamUnavailable(msg),
            UpstreamError::Status { status, message } => {
                OrchestratorError::UpstreamUnavailable(format!("HTTP {}: {}", status, message))
            }
            UpstreamError::CircuitOpen {
                dependency,
                retry_after,
            } => OrchestratorError::CircuitOpen {
                dependency,
                retry_after,
            },
            UpstreamError::RateLimited { retry_after } => OrchestratorError::RateLimited { retry_after },
            UpstreamError::Rejected(msg) => OrchestratorError::Validation(msg),
            UpstreamError::Decode(msg) => {
                OrchestratorError::UpstreamUnavailable(format!("malformed response: {}", msg))
            }
            UpstreamError::Cancelled => OrchestratorError::Cancelled,
        }
    }
}

/// Task lifecycle state
///
/// `pending → preprocessing → routed → executing → integrating`, ending in
/// `completed`, `failed` or `cancelled`. Cancellation is reachable from any
/// non-terminal state; nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Preprocessing,
    Routed,
    Executing,
    Integrating,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Pending,
        TaskStatus::Preprocessing,
        TaskStatus::Routed,
        TaskStatus::Executing,
        TaskStatus::Integrating,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Preprocessing => "preprocessing",
            TaskStatus::Routed => "routed",
            TaskStatus::Executing => "executing",
            TaskStatus::Integrating => "integrating",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Preprocessing)
                | (Preprocessing, Routed)
                | (Preprocessing, Failed)
                | (Routed, Executing)
                | (Routed, Failed)
                | (Executing, Integrating)
                | (Executing, Failed)
                | (Integrating, Completed)
                | (Integrating, Failed)
        )
    }

    /// Validate a transition, returning the new state
    pub fn transition(self, next: TaskStatus) -> Result<TaskStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(OrchestratorError::InvalidTransition { from: self, to: next })
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| OrchestratorError::Validation(format!("unknown task status: {}", s)))
    }
}

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut status = TaskStatus::Pending;
        for next in [
            TaskStatus::Preprocessing,
            TaskStatus::Routed,
            TaskStatus::Executing,
            TaskStatus::Integrating,
            TaskStatus::Completed,
        ] {
            status = status.transition(next).unwrap();
        }
        assert_eq!(status, TaskStatus::Completed);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            for next in TaskStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_pending_only_reaches_preprocessing_or_cancelled() {
        for next in TaskStatus::ALL {
            let outcome = TaskStatus::Pending.transition(next);
            match next {
                TaskStatus::Preprocessing | TaskStatus::Cancelled => assert_eq!(outcome.unwrap(), next),
                _ => assert!(
                    matches!(
                        outcome,
                        Err(OrchestratorError::InvalidTransition {
                            from: TaskStatus::Pending,
                            to
                        }) if to == next
                    ),
                    "pending -> {} should be rejected",
                    next
                ),
            }
        }
    }

    #[test]
    fn test_no_state_is_skipped() {
        use TaskStatus::*;
        for (from, to) in [(Routed, Completed), (Preprocessing, Executing), (Executing, Completed), (Routed, Integrating)] {
            assert!(from.transition(to).is_err(), "{} -> {}", from, to);
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("running".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_reason_starts_with_kind() {
        let err = OrchestratorError::NoCapableArm("no healthy arm offers [sql]".into());
        assert_eq!(err.reason(), "NoCapableArmError: No capable arm: no healthy arm offers [sql]");

        let err = OrchestratorError::Database(DatabaseError::QueryError("syntax error near x".into()));
        assert!(!err.reason().contains("syntax"));
    }

    #[test]
    fn test_upstream_errors_map_to_taxonomy() {
        let err: OrchestratorError = UpstreamError::Timeout("reflex".into()).into();
        assert_eq!(err.kind(), "UpstreamTimeoutError");
        let err: OrchestratorError = UpstreamError::Rejected("text must not be empty".into()).into();
        assert_eq!(err.kind(), "ValidationError");
        assert!(!err.is_transient());
    }
}
