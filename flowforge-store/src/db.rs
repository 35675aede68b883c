use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create ssh_keys table (referenced by projects)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ssh_keys (
            id UUID PRIMARY KEY,
            owner_id UUID NOT NULL,
            name VARCHAR(255) NOT NULL,
            public_key TEXT NOT NULL,
            private_key TEXT NOT NULL,
            host VARCHAR(255),
            port INTEGER NOT NULL DEFAULT 22,
            username VARCHAR(255) NOT NULL DEFAULT 'root',
            status VARCHAR(50) NOT NULL DEFAULT 'active',
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create projects table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id UUID PRIMARY KEY,
            owner_id UUID NOT NULL,
            name VARCHAR(255) NOT NULL,
            description TEXT,
            repo_url TEXT NOT NULL,
            branch VARCHAR(255) NOT NULL DEFAULT 'main',
            build_path TEXT NOT NULL DEFAULT './',
            deploy_path TEXT,
            credential_id UUID REFERENCES ssh_keys(id) ON DELETE SET NULL,
            status VARCHAR(50) NOT NULL DEFAULT 'inactive',
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create pipelines table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id UUID PRIMARY KEY,
            project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            description TEXT,
            spec TEXT NOT NULL,
            trigger VARCHAR(50) NOT NULL DEFAULT 'manual',
            cron_expr TEXT,
            status VARCHAR(50) NOT NULL DEFAULT 'active',
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create pipeline_runs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            run_number INTEGER NOT NULL,
            status VARCHAR(50) NOT NULL DEFAULT 'pending',
            trigger VARCHAR(50) NOT NULL,
            actor_id UUID NOT NULL,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ,
            duration_seconds BIGINT,
            log_output TEXT NOT NULL DEFAULT '',
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create run_steps table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_steps (
            id UUID PRIMARY KEY,
            run_id UUID NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
            step_index INTEGER NOT NULL,
            name VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL DEFAULT 'pending',
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ,
            command TEXT NOT NULL DEFAULT '',
            log_output TEXT NOT NULL DEFAULT '',
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for the hot query paths
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipelines_project ON pipelines(project_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON pipeline_runs(pipeline_id, run_number DESC)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status ON pipeline_runs(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_steps_run ON run_steps(run_id, step_index)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
