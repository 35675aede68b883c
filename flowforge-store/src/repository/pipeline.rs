//! Pipeline Repository
//!
//! Handles all database operations related to pipelines.

use flowforge_core::domain::pipeline::{Pipeline, TriggerKind};
use flowforge_core::dto::{CreatePipeline, Page};
use sqlx::PgPool;
use uuid::Uuid;

use crate::pagination;

/// Create a new pipeline in the database
pub async fn create(pool: &PgPool, req: CreatePipeline) -> Result<Pipeline, sqlx::Error> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let pipeline = Pipeline {
        id,
        project_id: req.project_id,
        name: req.name.clone(),
        description: req.description.clone(),
        spec: req.spec.clone(),
        trigger: req.trigger,
        cron_expr: req.cron_expr.clone(),
        status: "active".to_string(),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO pipelines (
            id, project_id, name, description, spec, trigger, cron_expr,
            status, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(pipeline.id)
    .bind(pipeline.project_id)
    .bind(&pipeline.name)
    .bind(&pipeline.description)
    .bind(&pipeline.spec)
    .bind(pipeline.trigger.as_str())
    .bind(&pipeline.cron_expr)
    .bind(&pipeline.status)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(pipeline)
}

/// Find a pipeline by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, project_id, name, description, spec, trigger, cron_expr,
               status, created_at, updated_at
        FROM pipelines
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List pipelines for a project, newest first
pub async fn list_by_project(
    pool: &PgPool,
    project_id: Uuid,
    page: Page,
) -> Result<Vec<Pipeline>, sqlx::Error> {
    let (limit, offset) = pagination::limit_offset(page);

    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, project_id, name, description, spec, trigger, cron_expr,
               status, created_at, updated_at
        FROM pipelines
        WHERE project_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(project_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// List every schedule-triggered pipeline, for scheduler registration at boot
pub async fn list_scheduled(pool: &PgPool) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, project_id, name, description, spec, trigger, cron_expr,
               status, created_at, updated_at
        FROM pipelines
        WHERE trigger = 'schedule' AND status = 'active'
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Update a pipeline's mutable fields
pub async fn update(pool: &PgPool, id: Uuid, req: CreatePipeline) -> Result<bool, sqlx::Error> {
    let now = chrono::Utc::now();

    let result = sqlx::query(
        r#"
        UPDATE pipelines
        SET name = $1, description = $2, spec = $3, trigger = $4,
            cron_expr = $5, updated_at = $6
        WHERE id = $7
        "#,
    )
    .bind(&req.name)
    .bind(&req.description)
    .bind(&req.spec)
    .bind(req.trigger.as_str())
    .bind(&req.cron_expr)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a pipeline by ID
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pipelines WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    description: Option<String>,
    spec: String,
    trigger: String,
    cron_expr: Option<String>,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        Pipeline {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            description: row.description,
            spec: row.spec,
            trigger: row.trigger.parse().unwrap_or(TriggerKind::Manual),
            cron_expr: row.cron_expr,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
