//! Per-step progress rows

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::error::{DatabaseError, DbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Call sent (or about to be); may need re-dispatch after a crash
    Dispatched,
    Done,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Dispatched => "dispatched",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> DbResult<Self> {
        match raw {
            "dispatched" => Ok(StepStatus::Dispatched),
            "done" => Ok(StepStatus::Done),
            "failed" => Ok(StepStatus::Failed),
            other => Err(DatabaseError::type_error(format!("unknown step status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct StepRow {
    pub step_index: i64,
    pub arm_id: String,
    pub status: String,
    pub output: Option<String>,
    pub tokens_used: i64,
    pub cost_units: f64,
    pub criteria_met: String,
    pub error: Option<String>,
}

/// Progress of one plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_index: usize,
    pub arm_id: String,
    pub status: StepStatus,
    pub output: Option<serde_json::Value>,
    pub tokens_used: u64,
    pub cost_units: f64,
    pub criteria_met: Vec<String>,
    pub error: Option<String>,
}

impl TryFrom<StepRow> for StepRecord {
    type Error = DatabaseError;

    fn try_from(row: StepRow) -> DbResult<Self> {
        Ok(Self {
            step_index: usize::try_from(row.step_index)
                .map_err(|_| DatabaseError::type_error("negative step_index"))?,
            arm_id: row.arm_id,
            status: StepStatus::parse(&row.status)?,
            output: row.output.as_deref().map(serde_json::from_str).transpose()?,
            tokens_used: u64::try_from(row.tokens_used).unwrap_or(0),
            cost_units: row.cost_units,
            criteria_met: serde_json::from_str(&row.criteria_met)?,
            error: row.error,
        })
    }
}
