//! Task row and its mapping to [`TaskContract`]

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::error::{DatabaseError, DbResult};
use crate::task::TaskContract;

/// Represents a task in the orchestrator database
///
/// Collections are JSON strings; status and priority are their lowercase
/// names.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub goal: String,
    pub constraints: String,
    pub context: String,
    pub acceptance_criteria: String,
    pub budget: String,
    pub required_capabilities: String,
    pub steps: String,
    pub priority: String,
    pub owner: Option<String>,
    pub status: String,
    pub assigned_arm: Option<String>,
    pub reason: Option<String>,
    pub result: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn json<T: DeserializeOwned>(column: &str, raw: &str) -> DbResult<T> {
    serde_json::from_str(raw)
        .map_err(|e| DatabaseError::type_error(format!("column {}: {}", column, e)))
}

fn timestamp(column: &str, raw: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::type_error(format!("column {}: {}", column, e)))
}

impl TaskRow {
    pub fn from_contract(task: &TaskContract) -> DbResult<Self> {
        Ok(Self {
            id: task.task_id.to_string(),
            goal: task.goal.clone(),
            constraints: serde_json::to_string(&task.constraints)?,
            context: serde_json::to_string(&task.context)?,
            acceptance_criteria: serde_json::to_string(&task.acceptance_criteria)?,
            budget: serde_json::to_string(&task.budget)?,
            required_capabilities: serde_json::to_string(&task.required_capabilities)?,
            steps: serde_json::to_string(&task.steps)?,
            priority: task.priority.as_str().to_string(),
            owner: task.owner.clone(),
            status: task.status.as_str().to_string(),
            assigned_arm: task.assigned_arm.clone(),
            reason: task.reason.clone(),
            result: task.result.as_ref().map(serde_json::to_string).transpose()?,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        })
    }

    pub fn into_contract(self) -> DbResult<TaskContract> {
        Ok(TaskContract {
            task_id: Uuid::parse_str(&self.id)
                .map_err(|e| DatabaseError::type_error(format!("column id: {}", e)))?,
            goal: self.goal,
            constraints: json("constraints", &self.constraints)?,
            context: json("context", &self.context)?,
            acceptance_criteria: json("acceptance_criteria", &self.acceptance_criteria)?,
            budget: json("budget", &self.budget)?,
            required_capabilities: json("required_capabilities", &self.required_capabilities)?,
            steps: json("steps", &self.steps)?,
            priority: self
                .priority
                .parse()
                .map_err(|_| DatabaseError::type_error(format!("column priority: {}", self.priority)))?,
            owner: self.owner,
            status: self
                .status
                .parse()
                .map_err(|_| DatabaseError::type_error(format!("column status: {}", self.status)))?,
            assigned_arm: self.assigned_arm,
            reason: self.reason,
            result: self.result.as_deref().map(|r| json("result", r)).transpose()?,
            created_at: timestamp("created_at", &self.created_at)?,
            updated_at: timestamp("updated_at", &self.updated_at)?,
        })
    }
}
