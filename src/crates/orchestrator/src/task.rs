//! Task contracts
//!
//! A [`TaskContract`] is the durable record of one unit of work. It is built
//! from a [`NewTask`] submission and only ever changes through lifecycle
//! transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::{OrchestratorError, Result, TaskStatus};

pub const MAX_GOAL_CHARS: usize = 10_000;

/// Resource limits, fixed once a task is accepted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBudget {
    pub max_tokens: u64,
    pub max_time_seconds: u64,
    pub max_cost_units: f64,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            max_tokens: 10_000,
            max_time_seconds: 300,
            max_cost_units: 1.0,
        }
    }
}

impl ResourceBudget {
    pub fn validate(&self) -> Result<()> {
        if !(1..=100_000).contains(&self.max_tokens) {
            return Err(OrchestratorError::Validation(
                "budget.max_tokens must be between 1 and 100000".into(),
            ));
        }
        if !(1..=3600).contains(&self.max_time_seconds) {
            return Err(OrchestratorError::Validation(
                "budget.max_time_seconds must be between 1 and 3600".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.max_cost_units) {
            return Err(OrchestratorError::Validation(
                "budget.max_cost_units must be between 0 and 100".into(),
            ));
        }
        Ok(())
    }

    pub fn max_time(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.max_time_seconds)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(OrchestratorError::Validation(format!("unknown priority: {}", other))),
        }
    }
}

/// One step of a multi-step plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
}

/// Submission body for a new task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub goal: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub budget: ResourceBudget,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub priority: Priority,
}

impl NewTask {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Self::default()
        }
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.required_capabilities.insert(tag.into());
        self
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }

    pub fn with_step(mut self, description: impl Into<String>, tags: &[&str]) -> Self {
        self.steps.push(PlanStep {
            description: description.into(),
            required_capabilities: tags.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    pub fn with_budget(mut self, budget: ResourceBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let goal = self.goal.trim();
        if goal.is_empty() {
            return Err(OrchestratorError::Validation("goal must not be empty".into()));
        }
        if goal.chars().count() > MAX_GOAL_CHARS {
            return Err(OrchestratorError::Validation(format!(
                "goal exceeds {} characters",
                MAX_GOAL_CHARS
            )));
        }
        if self.acceptance_criteria.iter().any(|c| c.trim().is_empty()) {
            return Err(OrchestratorError::Validation(
                "acceptance criteria must not be blank".into(),
            ));
        }
        if self.steps.iter().any(|s| s.description.trim().is_empty()) {
            return Err(OrchestratorError::Validation("step description must not be blank".into()));
        }
        self.budget.validate()
    }
}

/// Merged outcome of a completed task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Single-step tasks carry the arm output as-is; multi-step tasks an
    /// array in step order
    pub output: serde_json::Value,
    pub criteria_met: Vec<String>,
    pub tokens_used: u64,
    pub cost_units: f64,
}

/// Durable task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContract {
    pub task_id: Uuid,
    pub goal: String,
    pub constraints: Vec<String>,
    pub context: BTreeMap<String, serde_json::Value>,
    pub acceptance_criteria: Vec<String>,
    pub budget: ResourceBudget,
    pub required_capabilities: BTreeSet<String>,
    pub steps: Vec<PlanStep>,
    pub priority: Priority,
    /// Caller identity used for rate limiting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub status: TaskStatus,
    pub assigned_arm: Option<String>,
    /// Terminal reason, prefixed with the error taxonomy name
    pub reason: Option<String>,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskContract {
    pub fn accept(new: NewTask, owner: Option<String>) -> Result<Self> {
        new.validate()?;
        let now = Utc::now();
        Ok(Self {
            task_id: Uuid::new_v4(),
            goal: new.goal,
            constraints: new.constraints,
            context: new.context,
            acceptance_criteria: new.acceptance_criteria,
            budget: new.budget,
            required_capabilities: new.required_capabilities,
            steps: new.steps,
            priority: new.priority,
            owner,
            status: TaskStatus::Pending,
            assigned_arm: None,
            reason: None,
            result: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Steps to execute; a task without explicit steps is one step
    /// carrying the task's own requirements
    pub fn plan(&self) -> Vec<PlanStep> {
        if self.steps.is_empty() {
            vec![PlanStep {
                description: self.goal.clone(),
                required_capabilities: self.required_capabilities.clone(),
            }]
        } else {
            self.steps
                .iter()
                .map(|step| PlanStep {
                    description: step.description.clone(),
                    required_capabilities: step
                        .required_capabilities
                        .union(&self.required_capabilities)
                        .cloned()
                        .collect(),
                })
                .collect()
        }
    }

    /// Text screened by the reflex tier
    pub fn screening_text(&self) -> String {
        let mut parts = vec![self.goal.as_str()];
        parts.extend(self.constraints.iter().map(String::as_str));
        parts.extend(self.steps.iter().map(|s| s.description.as_str()));
        parts.join("\n")
    }

    /// Idempotency key for the arm call of one step
    pub fn idempotency_key(&self, step_index: usize) -> String {
        format!("{}:{}", self.task_id, step_index)
    }
}
