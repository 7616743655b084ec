//! Task repository for database operations

use chrono::Utc;
use uuid::Uuid;

use crate::db::connection::DatabasePool;
use crate::db::error::{DatabaseError, DbResult};
use crate::db::models::{TaskRow, TransitionRecord};
use crate::task::{TaskContract, TaskResult};
use crate::TaskStatus;

const TASK_COLUMNS: &str = "id, goal, constraints, context, acceptance_criteria, budget, \
     required_capabilities, steps, priority, owner, status, assigned_arm, reason, result, \
     created_at, updated_at";

/// Fields written together with a status change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionUpdate {
    pub reason: Option<String>,
    pub assigned_arm: Option<String>,
    pub result: Option<TaskResult>,
}

impl TransitionUpdate {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn assigned(arm_id: impl Into<String>) -> Self {
        Self {
            assigned_arm: Some(arm_id.into()),
            ..Self::default()
        }
    }

    pub fn result(result: TaskResult) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }
}

/// Task repository for managing task database operations
pub struct TaskRepository;

impl TaskRepository {
    /// Insert a new task together with its first transition row
    pub async fn create(pool: &DatabasePool, task: &TaskContract) -> DbResult<()> {
        let row = TaskRow::from_contract(task)?;
        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO tasks (id, goal, constraints, context, acceptance_criteria, budget,
                                required_capabilities, steps, priority, owner, status,
                                assigned_arm, reason, result, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.goal)
        .bind(&row.constraints)
        .bind(&row.context)
        .bind(&row.acceptance_criteria)
        .bind(&row.budget)
        .bind(&row.required_capabilities)
        .bind(&row.steps)
        .bind(&row.priority)
        .bind(&row.owner)
        .bind(&row.status)
        .bind(&row.assigned_arm)
        .bind(&row.reason)
        .bind(&row.result)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO task_transitions (task_id, from_status, to_status, reason, created_at)
             VALUES (?, NULL, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.status)
        .bind("submitted")
        .bind(&row.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Get a task by ID
    pub async fn get(pool: &DatabasePool, id: Uuid) -> DbResult<Option<TaskContract>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?;

        row.map(TaskRow::into_contract).transpose()
    }

    /// Newest first, optionally filtered by status
    pub async fn list(
        pool: &DatabasePool,
        status: Option<TaskStatus>,
        limit: u32,
    ) -> DbResult<Vec<TaskContract>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, TaskRow>(&format!(
                    "SELECT {} FROM tasks WHERE status = ? ORDER BY created_at DESC LIMIT ?",
                    TASK_COLUMNS
                ))
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, TaskRow>(&format!(
                    "SELECT {} FROM tasks ORDER BY created_at DESC LIMIT ?",
                    TASK_COLUMNS
                ))
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
        };

        rows.into_iter().map(TaskRow::into_contract).collect()
    }

    /// Tasks a restarted process must pick up, oldest first
    pub async fn list_non_terminal(pool: &DatabasePool) -> DbResult<Vec<TaskContract>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks
             WHERE status NOT IN ('completed', 'failed', 'cancelled')
             ORDER BY created_at ASC",
            TASK_COLUMNS
        ))
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(TaskRow::into_contract).collect()
    }

    /// Compare-and-set the status from `from` to `to`
    ///
    /// The status update and the transition log row commit together.
    /// Returns `false` without writing anything when the stored status is no
    /// longer `from`.
    pub async fn transition(
        pool: &DatabasePool,
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        update: &TransitionUpdate,
    ) -> DbResult<bool> {
        if !from.can_transition_to(to) {
            return Err(DatabaseError::InvalidTransition { from, to });
        }
        let now = Utc::now().to_rfc3339();
        let result_json = update.result.as_ref().map(serde_json::to_string).transpose()?;
        let mut tx = pool.begin().await?;

        let applied = sqlx::query(
            "UPDATE tasks
             SET status = ?,
                 updated_at = ?,
                 reason = COALESCE(?, reason),
                 assigned_arm = COALESCE(?, assigned_arm),
                 result = COALESCE(?, result)
             WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(&now)
        .bind(&update.reason)
        .bind(&update.assigned_arm)
        .bind(&result_json)
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if applied == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO task_transitions (task_id, from_status, to_status, reason, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(&update.reason)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Transition log of one task in write order
    pub async fn transitions(pool: &DatabasePool, id: Uuid) -> DbResult<Vec<TransitionRecord>> {
        let rows = sqlx::query_as::<_, TransitionRecord>(
            "SELECT id, task_id, from_status, to_status, reason, created_at
             FROM task_transitions WHERE task_id = ? ORDER BY id ASC",
        )
        .bind(id.to_string())
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Number of tasks per status, for metrics
    pub async fn count_by_status(pool: &DatabasePool) -> DbResult<Vec<(TaskStatus, u64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(pool)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(status, count)| {
                status
                    .parse::<TaskStatus>()
                    .ok()
                    .map(|s| (s, u64::try_from(count).unwrap_or(0)))
            })
            .collect())
    }
}
