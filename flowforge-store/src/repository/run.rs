//! Run Repository
//!
//! Handles all database operations related to pipeline runs. The terminal
//! transition is a single transaction: status, end time, duration, log blob,
//! and error message are written atomically so readers never observe a
//! terminal status without its matching end state.

use flowforge_core::domain::pipeline::TriggerKind;
use flowforge_core::domain::run::{PipelineRun, RunStatus};
use flowforge_core::dto::Page;
use sqlx::PgPool;
use uuid::Uuid;

use crate::pagination;

/// Create a new pending run, allocating the next per-pipeline run number
/// inside the insert transaction.
pub async fn create(
    pool: &PgPool,
    pipeline_id: Uuid,
    trigger: TriggerKind,
    actor_id: Uuid,
) -> Result<PipelineRun, sqlx::Error> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let mut tx = pool.begin().await?;

    let run_number: i32 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX(run_number), 0) + 1
        FROM pipeline_runs
        WHERE pipeline_id = $1
        "#,
    )
    .bind(pipeline_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO pipeline_runs (
            id, pipeline_id, run_number, status, trigger, actor_id, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(pipeline_id)
    .bind(run_number)
    .bind(RunStatus::Pending.as_str())
    .bind(trigger.as_str())
    .bind(actor_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(PipelineRun {
        id,
        pipeline_id,
        run_number,
        status: RunStatus::Pending,
        trigger,
        actor_id,
        started_at: None,
        finished_at: None,
        duration_seconds: None,
        log_output: String::new(),
        error_message: None,
        created_at: now,
    })
}

/// Find a run by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<PipelineRun>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT id, pipeline_id, run_number, status, trigger, actor_id,
               started_at, finished_at, duration_seconds, log_output,
               error_message, created_at
        FROM pipeline_runs
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List runs for a pipeline, newest first
pub async fn list_by_pipeline(
    pool: &PgPool,
    pipeline_id: Uuid,
    page: Page,
) -> Result<Vec<PipelineRun>, sqlx::Error> {
    let (limit, offset) = pagination::limit_offset(page);

    let rows = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT id, pipeline_id, run_number, status, trigger, actor_id,
               started_at, finished_at, duration_seconds, log_output,
               error_message, created_at
        FROM pipeline_runs
        WHERE pipeline_id = $1
        ORDER BY run_number DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(pipeline_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Transition a pending run to running and stamp its start time
pub async fn mark_started(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET status = $1, started_at = $2
        WHERE id = $3 AND status = $4
        "#,
    )
    .bind(RunStatus::Running.as_str())
    .bind(chrono::Utc::now())
    .bind(id)
    .bind(RunStatus::Pending.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

/// Write the run's terminal state: status, end time, duration, the final log
/// blob, and the error message, all in one transaction.
pub async fn finish(
    pool: &PgPool,
    id: Uuid,
    status: RunStatus,
    log_output: &str,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now();

    let mut tx = pool.begin().await?;

    let started_at: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT started_at FROM pipeline_runs WHERE id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

    let duration_seconds = started_at.map(|start| (now - start).num_seconds());

    sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET status = $1, finished_at = $2, duration_seconds = $3,
            log_output = $4, error_message = $5
        WHERE id = $6
        "#,
    )
    .bind(status.as_str())
    .bind(now)
    .bind(duration_seconds)
    .bind(log_output)
    .bind(error_message)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Blank the log blobs of terminal runs older than the retention cutoff
pub async fn prune_logs_older_than(
    pool: &PgPool,
    cutoff: chrono::DateTime<chrono::Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET log_output = ''
        WHERE finished_at IS NOT NULL AND finished_at < $1 AND log_output <> ''
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    pipeline_id: Uuid,
    run_number: i32,
    status: String,
    trigger: String,
    actor_id: Uuid,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
    duration_seconds: Option<i64>,
    log_output: String,
    error_message: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<RunRow> for PipelineRun {
    fn from(row: RunRow) -> Self {
        PipelineRun {
            id: row.id,
            pipeline_id: row.pipeline_id,
            run_number: row.run_number,
            status: row.status.parse().unwrap_or(RunStatus::Failed),
            trigger: row.trigger.parse().unwrap_or(TriggerKind::Manual),
            actor_id: row.actor_id,
            started_at: row.started_at,
            finished_at: row.finished_at,
            duration_seconds: row.duration_seconds,
            log_output: row.log_output,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}
