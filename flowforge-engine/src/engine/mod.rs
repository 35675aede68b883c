//! Pipeline engine
//!
//! Owns the run lifecycle: validates and admits trigger requests, executes
//! each run on its own task bounded by the dispatch gate, fans out live
//! logs, and serves cancellation. The engine is the sole entry point the
//! API layer calls: [`Engine::run`], [`Engine::cancel`], and
//! [`Engine::tail_logs`].

pub mod driver;
pub mod gate;
pub mod logs;
pub mod registry;
pub mod store;

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use flowforge_core::domain::pipeline::TriggerKind;
use flowforge_core::domain::run::PipelineRun;
use flowforge_core::spec::PipelineSpec;

use crate::config::Config;
use crate::engine::driver::{ProjectLocks, RunContext, RunDriver};
use crate::engine::gate::DispatchGate;
use crate::engine::logs::RunLogSink;
use crate::engine::registry::{Registry, RunHandle};
use crate::engine::store::EngineStore;
use crate::error::{EngineError, Result};
use crate::exec::ScriptExecutor;
use crate::git::SourceFetcher;

/// The pipeline execution engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Engine {
    driver: Arc<RunDriver>,
}

impl Engine {
    /// Builds an engine over the given store. Must be called from within a
    /// tokio runtime: the live-run registry starts its owner task here.
    pub fn new(config: Config, store: Arc<dyn EngineStore>) -> Self {
        let executor = ScriptExecutor::new(&config);
        let fetcher = Arc::new(SourceFetcher::new(&config));
        let gate = DispatchGate::new(config.max_concurrent_runs);

        Self {
            driver: Arc::new(RunDriver {
                config,
                store,
                executor,
                fetcher,
                registry: Registry::spawn(),
                gate,
                project_locks: ProjectLocks::default(),
            }),
        }
    }

    /// Launches a run of `pipeline_id`.
    ///
    /// Validation failures (bad spec, bad cron, missing entities) reject the
    /// request before any run record exists. On success the pending run is
    /// returned immediately; execution proceeds asynchronously.
    pub async fn run(
        &self,
        pipeline_id: Uuid,
        trigger: TriggerKind,
        actor_id: Uuid,
    ) -> Result<PipelineRun> {
        let driver = &self.driver;

        let pipeline = driver
            .store
            .load_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("pipeline {}", pipeline_id)))?;

        if pipeline.trigger == TriggerKind::Schedule {
            let expr = pipeline
                .cron_expr
                .as_deref()
                .filter(|e| !e.trim().is_empty())
                .ok_or_else(|| {
                    EngineError::Validation(
                        "schedule-triggered pipeline has no cron expression".to_string(),
                    )
                })?;
            cron::Schedule::from_str(expr).map_err(|err| {
                EngineError::Validation(format!("invalid cron expression '{}': {}", expr, err))
            })?;
        }

        let spec = PipelineSpec::parse(&pipeline.spec)
            .map_err(|err| EngineError::Validation(err.to_string()))?;

        let project = driver
            .store
            .load_project(pipeline.project_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("project {}", pipeline.project_id)))?;

        let run = driver.store.create_run(pipeline_id, trigger, actor_id).await?;

        info!(
            "Run {} (#{}) created for pipeline '{}' ({} trigger)",
            run.id, run.run_number, pipeline.name, trigger
        );

        let token = CancellationToken::new();
        let sink = RunLogSink::new();

        // Registered before admission so a still-pending run is cancellable.
        driver
            .registry
            .register(run.id, RunHandle { cancel: token.clone(), log_tx: sink.sender() })
            .await;

        let ctx = RunContext { run: run.clone(), pipeline, project, spec, token, sink };
        tokio::spawn(Arc::clone(driver).execute(ctx));

        Ok(run)
    }

    /// Cancels a live run. Best-effort: the run reaches a terminal state
    /// within one step boundary.
    pub async fn cancel(&self, run_id: Uuid) -> Result<()> {
        if self.driver.registry.cancel(run_id).await {
            info!("Cancellation requested for run {}", run_id);
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("run {} not found or already finished", run_id)))
        }
    }

    /// Attaches to a live run's log stream. Historical logs are served from
    /// the persistent store by the API layer, not from here.
    pub async fn tail_logs(&self, run_id: Uuid) -> Result<broadcast::Receiver<String>> {
        self.driver
            .registry
            .subscribe(run_id)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("run {} not found or already finished", run_id)))
    }

    /// Number of currently live (registered) runs.
    pub async fn live_runs(&self) -> usize {
        self.driver.registry.live_count().await
    }

    /// Engine store handle, shared with the scheduler's cleanup job.
    pub fn store(&self) -> Arc<dyn EngineStore> {
        Arc::clone(&self.driver.store)
    }

    pub fn config(&self) -> &Config {
        &self.driver.config
    }
}
