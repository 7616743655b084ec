//! Step repository: per-step progress of multi-step plans

use chrono::Utc;
use uuid::Uuid;

use crate::db::connection::DatabasePool;
use crate::db::error::DbResult;
use crate::db::models::step::StepRow;
use crate::db::models::{StepRecord, StepStatus};

pub struct StepRepository;

impl StepRepository {
    /// Record that a step is being dispatched to `arm_id`
    ///
    /// Written before the arm call. A step already marked done is left
    /// untouched.
    pub async fn mark_dispatched(
        pool: &DatabasePool,
        task_id: Uuid,
        step_index: usize,
        arm_id: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO task_steps (task_id, step_index, arm_id, status, updated_at)
             VALUES (?, ?, ?, 'dispatched', ?)
             ON CONFLICT (task_id, step_index) DO UPDATE
             SET arm_id = excluded.arm_id,
                 status = 'dispatched',
                 error = NULL,
                 updated_at = excluded.updated_at
             WHERE task_steps.status != 'done'",
        )
        .bind(task_id.to_string())
        .bind(step_index as i64)
        .bind(arm_id)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn mark_done(
        pool: &DatabasePool,
        task_id: Uuid,
        step_index: usize,
        output: &serde_json::Value,
        tokens_used: u64,
        cost_units: f64,
        criteria_met: &[String],
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE task_steps
             SET status = 'done', output = ?, tokens_used = ?, cost_units = ?,
                 criteria_met = ?, error = NULL, updated_at = ?
             WHERE task_id = ? AND step_index = ?",
        )
        .bind(serde_json::to_string(output)?)
        .bind(i64::try_from(tokens_used).unwrap_or(i64::MAX))
        .bind(cost_units)
        .bind(serde_json::to_string(criteria_met)?)
        .bind(Utc::now().to_rfc3339())
        .bind(task_id.to_string())
        .bind(step_index as i64)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn mark_failed(
        pool: &DatabasePool,
        task_id: Uuid,
        step_index: usize,
        error: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE task_steps SET status = 'failed', error = ?, updated_at = ?
             WHERE task_id = ? AND step_index = ? AND status != 'done'",
        )
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(task_id.to_string())
        .bind(step_index as i64)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// All recorded steps of a task in plan order
    pub async fn list(pool: &DatabasePool, task_id: Uuid) -> DbResult<Vec<StepRecord>> {
        let rows = sqlx::query_as::<_, StepRow>(
            "SELECT step_index, arm_id, status, output, tokens_used, cost_units, criteria_met, error
             FROM task_steps WHERE task_id = ? ORDER BY step_index ASC",
        )
        .bind(task_id.to_string())
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(StepRecord::try_from).collect()
    }

    pub async fn completed(pool: &DatabasePool, task_id: Uuid) -> DbResult<Vec<StepRecord>> {
        Ok(Self::list(pool, task_id)
            .await?
            .into_iter()
            .filter(|s| s.status == StepStatus::Done)
            .collect())
    }
}
