//! Project Repository
//!
//! Handles all database operations related to projects.

use flowforge_core::domain::project::Project;
use flowforge_core::dto::{CreateProject, Page, UpdateProject};
use sqlx::PgPool;
use uuid::Uuid;

use crate::pagination;

/// Create a new project in the database
pub async fn create(pool: &PgPool, req: CreateProject) -> Result<Project, sqlx::Error> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let project = Project {
        id,
        owner_id: req.owner_id,
        name: req.name.clone(),
        description: req.description.clone(),
        repo_url: req.repo_url.clone(),
        branch: req.branch.clone().unwrap_or_else(|| Project::DEFAULT_BRANCH.to_string()),
        build_path: req.build_path.clone().unwrap_or_else(|| "./".to_string()),
        deploy_path: req.deploy_path.clone(),
        credential_id: req.credential_id,
        status: "inactive".to_string(),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO projects (
            id, owner_id, name, description, repo_url, branch,
            build_path, deploy_path, credential_id, status, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(project.id)
    .bind(project.owner_id)
    .bind(&project.name)
    .bind(&project.description)
    .bind(&project.repo_url)
    .bind(&project.branch)
    .bind(&project.build_path)
    .bind(&project.deploy_path)
    .bind(project.credential_id)
    .bind(&project.status)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(project)
}

/// Find a project by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Project>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, owner_id, name, description, repo_url, branch,
               build_path, deploy_path, credential_id, status, created_at, updated_at
        FROM projects
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List projects for an owner, newest first
pub async fn list_by_owner(
    pool: &PgPool,
    owner_id: Uuid,
    page: Page,
) -> Result<Vec<Project>, sqlx::Error> {
    let (limit, offset) = pagination::limit_offset(page);

    let rows = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, owner_id, name, description, repo_url, branch,
               build_path, deploy_path, credential_id, status, created_at, updated_at
        FROM projects
        WHERE owner_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(owner_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Update a project; `None` fields are left unchanged
pub async fn update(pool: &PgPool, id: Uuid, req: UpdateProject) -> Result<bool, sqlx::Error> {
    let existing = match find_by_id(pool, id).await? {
        Some(p) => p,
        None => return Ok(false),
    };

    let now = chrono::Utc::now();
    let credential_id = match req.credential_id {
        Some(value) => value,
        None => existing.credential_id,
    };

    let result = sqlx::query(
        r#"
        UPDATE projects
        SET name = $1, description = $2, repo_url = $3, branch = $4,
            build_path = $5, deploy_path = $6, credential_id = $7,
            status = $8, updated_at = $9
        WHERE id = $10
        "#,
    )
    .bind(req.name.unwrap_or(existing.name))
    .bind(req.description.or(existing.description))
    .bind(req.repo_url.unwrap_or(existing.repo_url))
    .bind(req.branch.unwrap_or(existing.branch))
    .bind(req.build_path.unwrap_or(existing.build_path))
    .bind(req.deploy_path.or(existing.deploy_path))
    .bind(credential_id)
    .bind(req.status.unwrap_or(existing.status))
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a project by ID
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    description: Option<String>,
    repo_url: String,
    branch: String,
    build_path: String,
    deploy_path: Option<String>,
    credential_id: Option<Uuid>,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            description: row.description,
            repo_url: row.repo_url,
            branch: row.branch,
            build_path: row.build_path,
            deploy_path: row.deploy_path,
            credential_id: row.credential_id,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
