//! Per-run execution driver
//!
//! Owns a run from admission to its terminal state. Stages execute
//! sequentially in spec order, steps sequentially within each stage; the
//! first failure marks every later step skipped. The driver is the only
//! writer of its run's records and performs exactly one terminal-state
//! write, after the last step record has settled. Errors never escape the
//! run's task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use flowforge_core::domain::pipeline::Pipeline;
use flowforge_core::domain::project::Project;
use flowforge_core::domain::run::{PipelineRun, RunStatus, StepRecord, StepStatus};
use flowforge_core::spec::{PipelineSpec, Step, StepKind};

use crate::config::Config;
use crate::engine::gate::DispatchGate;
use crate::engine::logs::RunLogSink;
use crate::engine::registry::Registry;
use crate::engine::store::EngineStore;
use crate::error::EngineError;
use crate::exec::{recipes, ExecuteOptions, LineCallback, ScriptError, ScriptExecutor, StreamKind};
use crate::git::{FetchError, SourceFetcher};

/// Everything a run needs for the duration of its execution.
pub(crate) struct RunContext {
    pub run: PipelineRun,
    pub pipeline: Pipeline,
    pub project: Project,
    pub spec: PipelineSpec,
    pub token: CancellationToken,
    pub sink: RunLogSink,
}

/// Advisory per-project mutexes serializing workspace access: at most one
/// live run per project holds its workspace at a time.
#[derive(Clone, Default)]
pub(crate) struct ProjectLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ProjectLocks {
    fn for_project(&self, project_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap();
        map.entry(project_id).or_default().clone()
    }
}

/// Shared execution machinery behind the engine facade.
pub(crate) struct RunDriver {
    pub config: Config,
    pub store: Arc<dyn EngineStore>,
    pub executor: ScriptExecutor,
    pub fetcher: Arc<SourceFetcher>,
    pub registry: Registry,
    pub gate: DispatchGate,
    pub project_locks: ProjectLocks,
}

impl RunDriver {
    /// Drives a run to its terminal state and cleans up its registry entry.
    pub async fn execute(self: Arc<Self>, ctx: RunContext) {
        let run_id = ctx.run.id;

        let (status, error_message, permit) = self.drive(&ctx).await;

        ctx.sink.publish(&format!("Pipeline finished with status: {}", status));

        if let Err(err) = self
            .store
            .finish_run(run_id, status, &ctx.sink.captured(), error_message.as_deref())
            .await
        {
            error!("Failed to persist terminal state for run {}: {:#}", run_id, err);
        }

        // Removing the handle drops the last log sender: subscribers see the
        // channel close right after the terminal write.
        self.registry.deregister(run_id).await;

        // The gate slot is held across the terminal write.
        drop(permit);

        info!("Run {} finished with status {}", run_id, status);
    }

    /// Runs the pipeline body and reports the terminal status, error
    /// message, and the gate permit (absent when the run was cancelled
    /// before admission). All failures are absorbed into that triple.
    async fn drive(
        &self,
        ctx: &RunContext,
    ) -> (RunStatus, Option<String>, Option<tokio::sync::OwnedSemaphorePermit>) {
        // Admission through the dispatch gate; a cancel while still pending
        // releases the waiter without consuming a slot.
        let permit = tokio::select! {
            permit = self.gate.admit() => permit,
            _ = ctx.token.cancelled() => {
                ctx.sink.publish("Run cancelled while waiting for admission");
                return (RunStatus::Cancelled, Some("run cancelled".to_string()), None);
            }
        };

        if let Err(err) = self.store.mark_run_started(ctx.run.id).await {
            error!("Failed to mark run {} started: {:#}", ctx.run.id, err);
            return (RunStatus::Failed, Some(format!("internal error: {:#}", err)), Some(permit));
        }

        ctx.sink.publish(&format!("Starting pipeline: {}", ctx.pipeline.name));

        // Journal every step up front as a contiguous pending prefix.
        let records = build_step_records(ctx);
        if let Err(err) = self.store.insert_steps(&records).await {
            error!("Failed to journal steps for run {}: {:#}", ctx.run.id, err);
            return (RunStatus::Failed, Some(format!("internal error: {:#}", err)), Some(permit));
        }

        // Workspace exclusivity: serialize runs of the same project.
        let project_lock = self.project_locks.for_project(ctx.project.id);
        let _workspace = tokio::select! {
            guard = project_lock.lock_owned() => guard,
            _ = ctx.token.cancelled() => {
                ctx.sink.publish("Run cancelled while waiting for the project workspace");
                self.skip_steps(&records, 0).await;
                return (RunStatus::Cancelled, Some("run cancelled".to_string()), Some(permit));
            }
        };

        if let Err(err) = tokio::fs::create_dir_all(self.config.workspace_path(ctx.project.id)).await
        {
            return (
                RunStatus::Failed,
                Some(format!("failed to prepare workspace: {}", err)),
                Some(permit),
            );
        }

        let mut step_iter = records.iter().enumerate();
        let mut failure: Option<EngineError> = None;

        let flat_steps = flatten_steps(&ctx.spec);

        for (idx, record) in step_iter.by_ref() {
            if ctx.token.is_cancelled() {
                ctx.sink.publish("Run cancelled; skipping remaining steps");
                self.skip_steps(&records, idx).await;
                return (RunStatus::Cancelled, Some("run cancelled".to_string()), Some(permit));
            }

            let (stage_name, step) = flat_steps[idx];
            ctx.sink.publish(&format!("Executing step: {} (stage {})", step.name, stage_name));

            if let Err(err) = self.store.mark_step_started(record.id).await {
                error!("Failed to mark step {} started: {:#}", record.id, err);
                failure = Some(EngineError::Internal(format!("{:#}", err)));
                let _ = self
                    .store
                    .finish_step(record.id, StepStatus::Failed, "", Some(&format!("{:#}", err)))
                    .await;
                break;
            }

            let step_log = StepLog::default();
            let outcome = self.dispatch_step(ctx, step, &step_log).await;

            match outcome {
                Ok(()) => {
                    ctx.sink.publish(&format!("Step {} succeeded", step.name));
                    if let Err(err) = self
                        .store
                        .finish_step(record.id, StepStatus::Success, &step_log.captured(), None)
                        .await
                    {
                        error!("Failed to persist step {}: {:#}", record.id, err);
                        failure = Some(EngineError::Internal(format!("{:#}", err)));
                        break;
                    }
                }
                Err(err) => {
                    let message = format!("step {} failed: {}", step.name, err);
                    ctx.sink.publish(&message);
                    let _ = self
                        .store
                        .finish_step(
                            record.id,
                            StepStatus::Failed,
                            &step_log.captured(),
                            Some(&err.to_string()),
                        )
                        .await;

                    if matches!(err, EngineError::Cancelled) {
                        self.skip_steps(&records, idx + 1).await;
                        return (
                            RunStatus::Cancelled,
                            Some("run cancelled".to_string()),
                            Some(permit),
                        );
                    }

                    failure = Some(EngineError::Internal(message));
                    break;
                }
            }
        }

        if failure.is_some() {
            // The failing step is settled; everything after it is skipped.
            let remaining_from = records.len() - step_iter.len();
            self.skip_steps(&records, remaining_from).await;
        }

        match failure {
            Some(err) => (RunStatus::Failed, Some(failure_message(&err)), Some(permit)),
            None => (RunStatus::Success, None, Some(permit)),
        }
    }

    /// Marks `records[from..]` skipped.
    async fn skip_steps(&self, records: &[StepRecord], from: usize) {
        for record in &records[from..] {
            if let Err(err) =
                self.store.finish_step(record.id, StepStatus::Skipped, "", None).await
            {
                error!("Failed to mark step {} skipped: {:#}", record.id, err);
            }
        }
    }

    /// Invokes exactly one of the step backends.
    async fn dispatch_step(
        &self,
        ctx: &RunContext,
        step: &Step,
        step_log: &StepLog,
    ) -> Result<(), EngineError> {
        match step.kind {
            StepKind::GitClone => self.run_git_clone(ctx, step_log).await,
            StepKind::Script => {
                let body = step.config.script.as_deref().unwrap_or_default();
                self.run_script(ctx, body, step.config.env.as_ref(), step_log).await
            }
            StepKind::Build => {
                let workspace = self.config.workspace_path(ctx.project.id);
                let (name, body) = recipes::resolve_build_recipe(step.config.build, &workspace)
                    .map_err(EngineError::Validation)?;
                ctx.sink.publish(&format!("Using build recipe: {}", name));
                self.run_script(ctx, body, step.config.env.as_ref(), step_log).await
            }
            StepKind::Deploy => {
                ctx.sink.publish("Using deploy recipe: deploy_script");
                let body = recipes::builtin("deploy_script")
                    .ok_or_else(|| EngineError::Internal("deploy recipe missing".to_string()))?;
                self.run_script(ctx, body, step.config.env.as_ref(), step_log).await
            }
        }
    }

    /// Fetches the project source into its workspace. Fetching uses the
    /// project-level credential only; per-step env does not apply here.
    async fn run_git_clone(&self, ctx: &RunContext, step_log: &StepLog) -> Result<(), EngineError> {
        let credential = match ctx.project.credential_id {
            Some(id) => Some(
                self.store
                    .load_credential(id)
                    .await
                    .map_err(|e| EngineError::Internal(format!("{:#}", e)))?
                    .ok_or_else(|| EngineError::NotFound(format!("credential {}", id)))?,
            ),
            None => None,
        };

        let fetcher = Arc::clone(&self.fetcher);
        let token = ctx.token.clone();
        let repo_url = ctx.project.repo_url.clone();
        let branch = ctx.project.branch.clone();
        let target = self.config.workspace_path(ctx.project.id);

        let result = tokio::task::spawn_blocking(move || {
            fetcher.clone_or_pull(&token, &repo_url, &branch, &target, credential.as_ref())
        })
        .await
        .map_err(|e| EngineError::Internal(format!("fetch task panicked: {}", e)))?;

        match result {
            Ok(()) => {
                let line = "Source checkout complete";
                step_log.append(line);
                ctx.sink.publish(line);
                Ok(())
            }
            Err(FetchError::Cancelled) => Err(EngineError::Cancelled),
            Err(FetchError::Timeout) => Err(EngineError::Timeout(self.config.git_timeout)),
            Err(err) => Err(EngineError::Transient(err.to_string())),
        }
    }

    /// Runs a script body with the merged environment in the project
    /// workspace.
    async fn run_script(
        &self,
        ctx: &RunContext,
        body: &str,
        user_env: Option<&HashMap<String, String>>,
        step_log: &StepLog,
    ) -> Result<(), EngineError> {
        let sink = ctx.sink.clone();
        let log = step_log.clone();
        let on_line: LineCallback = Arc::new(move |stream, line| {
            let rendered = match stream {
                StreamKind::Stdout => line.to_string(),
                StreamKind::Stderr => format!("ERROR: {}", line),
            };
            log.append(&rendered);
            sink.publish(&rendered);
        });

        let opts = ExecuteOptions {
            work_dir: Some(self.config.workspace_path(ctx.project.id)),
            env: merged_env(ctx, user_env),
            timeout: self.config.step_timeout,
            on_line: Some(on_line),
        };

        match self.executor.execute(&ctx.token, body, opts).await {
            Ok(result) if result.exit_code == 0 => Ok(()),
            Ok(result) => Err(EngineError::NonZeroExit(result.exit_code)),
            Err(ScriptError::Timeout { elapsed }) => Err(EngineError::Timeout(elapsed)),
            Err(ScriptError::Cancelled) => Err(EngineError::Cancelled),
            Err(ScriptError::Spawn(err)) => {
                Err(EngineError::Transient(format!("failed to start script: {}", err)))
            }
            Err(ScriptError::Io(err)) => Err(EngineError::Transient(err.to_string())),
        }
    }
}

/// Per-step accumulating log buffer.
#[derive(Clone, Default)]
struct StepLog {
    buffer: Arc<Mutex<String>>,
}

impl StepLog {
    fn append(&self, line: &str) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.push_str(line);
        buffer.push('\n');
    }

    fn captured(&self) -> String {
        self.buffer.lock().unwrap().clone()
    }
}

/// The well-known variables every script-executing step receives. These win
/// over user-provided keys so builtin recipes behave deterministically.
fn well_known_env(ctx: &RunContext) -> HashMap<String, String> {
    HashMap::from([
        ("PROJECT_NAME".to_string(), ctx.project.name.clone()),
        ("PROJECT_ID".to_string(), ctx.project.id.to_string()),
        ("PIPELINE_ID".to_string(), ctx.pipeline.id.to_string()),
        ("PIPELINE_RUN_ID".to_string(), ctx.run.id.to_string()),
        ("BUILD_VERSION".to_string(), format!("v{}", ctx.run.id)),
    ])
}

fn merged_env(
    ctx: &RunContext,
    user_env: Option<&HashMap<String, String>>,
) -> HashMap<String, String> {
    let mut env = user_env.cloned().unwrap_or_default();
    env.extend(well_known_env(ctx));
    env
}

/// Flattens the spec into `(stage name, step)` pairs in execution order.
fn flatten_steps(spec: &PipelineSpec) -> Vec<(&str, &Step)> {
    spec.stages
        .iter()
        .flat_map(|stage| stage.steps.iter().map(move |step| (stage.name.as_str(), step)))
        .collect()
}

/// Builds the pending step journal for a run: indices are a contiguous
/// prefix starting at 0 across the whole run.
fn build_step_records(ctx: &RunContext) -> Vec<StepRecord> {
    flatten_steps(&ctx.spec)
        .into_iter()
        .enumerate()
        .map(|(index, (_stage, step))| StepRecord {
            id: Uuid::new_v4(),
            run_id: ctx.run.id,
            step_index: index as i32,
            name: step.name.clone(),
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            command: command_descriptor(ctx, step),
            log_output: String::new(),
            error_message: None,
        })
        .collect()
}

/// Command text stored on the step record: the script body itself, or a
/// synthesized descriptor for non-script steps.
fn command_descriptor(ctx: &RunContext, step: &Step) -> String {
    match step.kind {
        StepKind::Script => step.config.script.clone().unwrap_or_default(),
        StepKind::GitClone => {
            format!("git clone {} (branch {})", ctx.project.repo_url, ctx.project.branch)
        }
        StepKind::Build => match step.config.build {
            Some(kind) => format!("builtin:{:?}", kind).to_lowercase(),
            None => "builtin:auto".to_string(),
        },
        StepKind::Deploy => "builtin:deploy_script".to_string(),
    }
}

fn failure_message(err: &EngineError) -> String {
    match err {
        EngineError::Internal(message) => message.clone(),
        other => other.to_string(),
    }
}
