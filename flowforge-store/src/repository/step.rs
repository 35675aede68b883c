//! Step Repository
//!
//! Handles all database operations related to per-run step records.

use flowforge_core::domain::run::{StepRecord, StepStatus};
use sqlx::PgPool;
use uuid::Uuid;

/// Insert the full set of step records for a run in one transaction.
///
/// Steps are journaled up front as `pending` so their indices always form a
/// contiguous prefix starting at 0.
pub async fn insert_all(pool: &PgPool, steps: &[StepRecord]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for step in steps {
        sqlx::query(
            r#"
            INSERT INTO run_steps (
                id, run_id, step_index, name, status, command, log_output
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(step.id)
        .bind(step.run_id)
        .bind(step.step_index)
        .bind(&step.name)
        .bind(step.status.as_str())
        .bind(&step.command)
        .bind(&step.log_output)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(())
}

/// Transition a step to running and stamp its start time
pub async fn mark_started(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE run_steps
        SET status = $1, started_at = $2
        WHERE id = $3
        "#,
    )
    .bind(StepStatus::Running.as_str())
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Write a step's terminal state
pub async fn finish(
    pool: &PgPool,
    id: Uuid,
    status: StepStatus,
    log_output: &str,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE run_steps
        SET status = $1, finished_at = $2, log_output = $3, error_message = $4
        WHERE id = $5
        "#,
    )
    .bind(status.as_str())
    .bind(chrono::Utc::now())
    .bind(log_output)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// List a run's steps in execution order
pub async fn list_by_run(pool: &PgPool, run_id: Uuid) -> Result<Vec<StepRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, StepRow>(
        r#"
        SELECT id, run_id, step_index, name, status, started_at, finished_at,
               command, log_output, error_message
        FROM run_steps
        WHERE run_id = $1
        ORDER BY step_index ASC
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct StepRow {
    id: Uuid,
    run_id: Uuid,
    step_index: i32,
    name: String,
    status: String,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
    command: String,
    log_output: String,
    error_message: Option<String>,
}

impl From<StepRow> for StepRecord {
    fn from(row: StepRow) -> Self {
        StepRecord {
            id: row.id,
            run_id: row.run_id,
            step_index: row.step_index,
            name: row.name,
            status: row.status.parse().unwrap_or(StepStatus::Failed),
            started_at: row.started_at,
            finished_at: row.finished_at,
            command: row.command,
            log_output: row.log_output,
            error_message: row.error_message,
        }
    }
}
