//! Engine-facing persistence seam
//!
//! The engine reads and journals run state through this trait rather than
//! calling the repositories directly, so run execution can be exercised
//! against an in-memory double. The production implementation delegates to
//! the persistence gateway.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use flowforge_core::domain::credential::SshKey;
use flowforge_core::domain::pipeline::{Pipeline, TriggerKind};
use flowforge_core::domain::project::Project;
use flowforge_core::domain::run::{PipelineRun, RunStatus, StepRecord, StepStatus};
use flowforge_store::repository;

/// Persistence operations the run driver depends on.
#[async_trait]
pub trait EngineStore: Send + Sync {
    async fn load_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>>;

    async fn load_project(&self, id: Uuid) -> Result<Option<Project>>;

    /// Loads a credential including its private half, for transport auth.
    async fn load_credential(&self, id: Uuid) -> Result<Option<SshKey>>;

    /// Creates a pending run with the next per-pipeline run number.
    async fn create_run(
        &self,
        pipeline_id: Uuid,
        trigger: TriggerKind,
        actor_id: Uuid,
    ) -> Result<PipelineRun>;

    /// Transitions a pending run to running and stamps its start time.
    async fn mark_run_started(&self, run_id: Uuid) -> Result<()>;

    /// Journals the full, contiguous set of pending step records for a run.
    async fn insert_steps(&self, steps: &[StepRecord]) -> Result<()>;

    async fn mark_step_started(&self, step_id: Uuid) -> Result<()>;

    async fn finish_step(
        &self,
        step_id: Uuid,
        status: StepStatus,
        log_output: &str,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// The run's single terminal-state write: status, end time, duration,
    /// log blob, and error message land atomically.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        log_output: &str,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Blanks log blobs of terminal runs older than the cutoff.
    async fn prune_run_logs(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64>;
}

/// Postgres-backed implementation delegating to the persistence gateway.
pub struct PgEngineStore {
    pool: PgPool,
}

impl PgEngineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EngineStore for PgEngineStore {
    async fn load_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>> {
        Ok(repository::pipeline::find_by_id(&self.pool, id).await?)
    }

    async fn load_project(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(repository::project::find_by_id(&self.pool, id).await?)
    }

    async fn load_credential(&self, id: Uuid) -> Result<Option<SshKey>> {
        Ok(repository::credential::find_by_id_with_secret(&self.pool, id).await?)
    }

    async fn create_run(
        &self,
        pipeline_id: Uuid,
        trigger: TriggerKind,
        actor_id: Uuid,
    ) -> Result<PipelineRun> {
        Ok(repository::run::create(&self.pool, pipeline_id, trigger, actor_id).await?)
    }

    async fn mark_run_started(&self, run_id: Uuid) -> Result<()> {
        Ok(repository::run::mark_started(&self.pool, run_id).await?)
    }

    async fn insert_steps(&self, steps: &[StepRecord]) -> Result<()> {
        Ok(repository::step::insert_all(&self.pool, steps).await?)
    }

    async fn mark_step_started(&self, step_id: Uuid) -> Result<()> {
        Ok(repository::step::mark_started(&self.pool, step_id).await?)
    }

    async fn finish_step(
        &self,
        step_id: Uuid,
        status: StepStatus,
        log_output: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        Ok(repository::step::finish(&self.pool, step_id, status, log_output, error_message).await?)
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        log_output: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        Ok(repository::run::finish(&self.pool, run_id, status, log_output, error_message).await?)
    }

    async fn prune_run_logs(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        Ok(repository::run::prune_logs_older_than(&self.pool, cutoff).await?)
    }
}
