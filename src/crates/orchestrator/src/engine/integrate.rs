//! Result integration and budget accounting

use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

use crate::db::{StepRecord, StepStatus};
use crate::task::{ResourceBudget, TaskContract, TaskResult};
use crate::{OrchestratorError, Result};

/// Tokens and cost reported by arms so far
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub tokens: u64,
    pub cost_units: f64,
}

impl Usage {
    pub fn from_steps<'a>(steps: impl IntoIterator<Item = &'a StepRecord>) -> Self {
        let mut usage = Self::default();
        for step in steps {
            usage.add(step.tokens_used, step.cost_units);
        }
        usage
    }

    pub fn add(&mut self, tokens: u64, cost_units: f64) {
        self.tokens = self.tokens.saturating_add(tokens);
        self.cost_units += cost_units.max(0.0);
    }

    pub fn check(&self, budget: &ResourceBudget) -> Result<()> {
        if self.tokens > budget.max_tokens {
            return Err(OrchestratorError::BudgetExceeded(format!(
                "used {} tokens of {}",
                self.tokens, budget.max_tokens
            )));
        }
        if self.cost_units > budget.max_cost_units {
            return Err(OrchestratorError::BudgetExceeded(format!(
                "used {:.4} cost units of {:.4}",
                self.cost_units, budget.max_cost_units
            )));
        }
        Ok(())
    }

    /// What the next arm call may spend
    pub fn remaining(&self, budget: &ResourceBudget, time_left: Duration) -> ResourceBudget {
        ResourceBudget {
            max_tokens: budget.max_tokens.saturating_sub(self.tokens),
            max_time_seconds: time_left.as_secs().max(1),
            max_cost_units: (budget.max_cost_units - self.cost_units).max(0.0),
        }
    }
}

/// Merge step results into the task result
///
/// Every plan step must be done, the union of reported criteria must cover
/// every acceptance criterion (exact match), and the summed usage must fit
/// the budget.
pub fn integrate(task: &TaskContract, steps: &[StepRecord]) -> Result<TaskResult> {
    let plan_len = task.plan().len();
    let mut slots: Vec<Option<&StepRecord>> = vec![None; plan_len];
    for step in steps.iter().filter(|s| s.status == StepStatus::Done) {
        if let Some(slot) = slots.get_mut(step.step_index) {
            *slot = Some(step);
        }
    }

    let missing: Vec<String> = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_none())
        .map(|(i, _)| i.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(OrchestratorError::AcceptanceCriteria(format!(
            "no result for step(s) {}",
            missing.join(", ")
        )));
    }
    let done: Vec<&StepRecord> = slots.into_iter().flatten().collect();

    let met: BTreeSet<&str> = done
        .iter()
        .flat_map(|s| s.criteria_met.iter().map(String::as_str))
        .collect();
    let unmet: Vec<&str> = task
        .acceptance_criteria
        .iter()
        .map(String::as_str)
        .filter(|c| !met.contains(c))
        .collect();
    if !unmet.is_empty() {
        return Err(OrchestratorError::AcceptanceCriteria(format!(
            "unmet: {}",
            unmet.join(", ")
        )));
    }

    let usage = Usage::from_steps(done.iter().copied());
    usage.check(&task.budget)?;

    let output = match done.as_slice() {
        [only] => only.output.clone().unwrap_or(Value::Null),
        many => Value::Array(
            many.iter()
                .map(|s| s.output.clone().unwrap_or(Value::Null))
                .collect(),
        ),
    };

    Ok(TaskResult {
        output,
        criteria_met: task.acceptance_criteria.clone(),
        tokens_used: usage.tokens,
        cost_units: usage.cost_units,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;
    use serde_json::json;

    fn done(index: usize, output: Value, tokens: u64, criteria: &[&str]) -> StepRecord {
        StepRecord {
            step_index: index,
            arm_id: "coder".into(),
            status: StepStatus::Done,
            output: Some(output),
            tokens_used: tokens,
            cost_units: 0.1,
            criteria_met: criteria.iter().map(|c| c.to_string()).collect(),
            error: None,
        }
    }

    fn two_step_task() -> TaskContract {
        let new = NewTask::new("Ship the fix")
            .with_step("write patch", &["code"])
            .with_step("review patch", &["review"])
            .with_criterion("compiles")
            .with_criterion("reviewed");
        TaskContract::accept(new, None).unwrap()
    }

    #[test]
    fn test_union_of_criteria_completes_task() {
        let task = two_step_task();
        let steps = vec![
            done(1, json!("lgtm"), 50, &["reviewed"]),
            done(0, json!({"diff": "+1"}), 100, &["compiles"]),
        ];

        let result = integrate(&task, &steps).unwrap();
        assert_eq!(result.output, json!([{"diff": "+1"}, "lgtm"]));
        assert_eq!(result.tokens_used, 150);
        assert!((result.cost_units - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_unmet_criterion_fails() {
        let task = two_step_task();
        let steps = vec![done(0, json!("x"), 1, &["compiles"]), done(1, json!("y"), 1, &[])];

        let err = integrate(&task, &steps).unwrap_err();
        assert_eq!(err.kind(), "AcceptanceCriteriaError");
        assert!(err.to_string().contains("reviewed"));
    }

    #[test]
    fn test_missing_step_fails() {
        let task = two_step_task();
        let err = integrate(&task, &[done(0, json!("x"), 1, &["compiles", "reviewed"])]).unwrap_err();
        assert!(err.to_string().contains("step(s) 1"));
    }

    #[test]
    fn test_single_step_output_is_unwrapped() {
        let task = TaskContract::accept(NewTask::new("one"), None).unwrap();
        let result = integrate(&task, &[done(0, json!({"answer": 42}), 10, &[])]).unwrap();
        assert_eq!(result.output, json!({"answer": 42}));
    }

    #[test]
    fn test_usage_checks_tokens_and_cost() {
        let budget = ResourceBudget {
            max_tokens: 100,
            max_time_seconds: 60,
            max_cost_units: 0.5,
        };
        let mut usage = Usage::default();
        usage.add(100, 0.5);
        assert!(usage.check(&budget).is_ok());

        usage.add(1, 0.0);
        assert_eq!(usage.check(&budget).unwrap_err().kind(), "BudgetExceededError");

        let remaining = Usage { tokens: 40, cost_units: 0.2 }.remaining(&budget, Duration::from_millis(300));
        assert_eq!(remaining.max_tokens, 60);
        assert_eq!(remaining.max_time_seconds, 1);
        assert!((remaining.max_cost_units - 0.3).abs() < 1e-9);
    }
}
