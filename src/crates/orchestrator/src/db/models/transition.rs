//! Transition log rows

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TransitionRecord {
    pub id: i64,
    pub task_id: String,
    /// `None` for the row written at submission
    pub from_status: Option<String>,
    pub to_status: String,
    pub reason: Option<String>,
    pub created_at: String,
}
