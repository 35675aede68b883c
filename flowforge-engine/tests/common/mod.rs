//! Shared test fixtures: an in-memory engine store and entity builders.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use flowforge_core::domain::credential::SshKey;
use flowforge_core::domain::pipeline::{Pipeline, TriggerKind};
use flowforge_core::domain::project::Project;
use flowforge_core::domain::run::{PipelineRun, RunStatus, StepRecord, StepStatus};
use flowforge_engine::engine::store::EngineStore;

/// In-memory stand-in for the persistence gateway.
#[derive(Default)]
pub struct MemoryStore {
    pub projects: Mutex<HashMap<Uuid, Project>>,
    pub pipelines: Mutex<HashMap<Uuid, Pipeline>>,
    pub credentials: Mutex<HashMap<Uuid, SshKey>>,
    pub runs: Mutex<HashMap<Uuid, PipelineRun>>,
    pub steps: Mutex<HashMap<Uuid, StepRecord>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_project(&self, project: Project) {
        self.projects.lock().unwrap().insert(project.id, project);
    }

    pub fn insert_pipeline(&self, pipeline: Pipeline) {
        self.pipelines.lock().unwrap().insert(pipeline.id, pipeline);
    }

    pub fn run(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.runs.lock().unwrap().get(&run_id).cloned()
    }

    /// Step records of a run in index order.
    pub fn steps_of(&self, run_id: Uuid) -> Vec<StepRecord> {
        let mut steps: Vec<_> = self
            .steps
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_index);
        steps
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn load_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>> {
        Ok(self.pipelines.lock().unwrap().get(&id).cloned())
    }

    async fn load_project(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(self.projects.lock().unwrap().get(&id).cloned())
    }

    async fn load_credential(&self, id: Uuid) -> Result<Option<SshKey>> {
        Ok(self.credentials.lock().unwrap().get(&id).cloned())
    }

    async fn create_run(
        &self,
        pipeline_id: Uuid,
        trigger: TriggerKind,
        actor_id: Uuid,
    ) -> Result<PipelineRun> {
        let mut runs = self.runs.lock().unwrap();
        let run_number =
            runs.values().filter(|r| r.pipeline_id == pipeline_id).count() as i32 + 1;

        let run = PipelineRun {
            id: Uuid::new_v4(),
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
            created_at: chrono::Utc::now(),
        };
        runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn mark_run_started(&self, run_id: Uuid) -> Result<()> {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.get_mut(&run_id) {
            if run.status == RunStatus::Pending {
                run.status = RunStatus::Running;
                run.started_at = Some(chrono::Utc::now());
            }
        }
        Ok(())
    }

    async fn insert_steps(&self, steps: &[StepRecord]) -> Result<()> {
        let mut map = self.steps.lock().unwrap();
        for step in steps {
            map.insert(step.id, step.clone());
        }
        Ok(())
    }

    async fn mark_step_started(&self, step_id: Uuid) -> Result<()> {
        let mut steps = self.steps.lock().unwrap();
        if let Some(step) = steps.get_mut(&step_id) {
            step.status = StepStatus::Running;
            step.started_at = Some(chrono::Utc::now());
        }
        Ok(())
    }

    async fn finish_step(
        &self,
        step_id: Uuid,
        status: StepStatus,
        log_output: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut steps = self.steps.lock().unwrap();
        if let Some(step) = steps.get_mut(&step_id) {
            step.status = status;
            step.finished_at = Some(chrono::Utc::now());
            step.log_output = log_output.to_string();
            step.error_message = error_message.map(String::from);
        }
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        log_output: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.get_mut(&run_id) {
            let now = chrono::Utc::now();
            run.status = status;
            run.finished_at = Some(now);
            run.duration_seconds = run.started_at.map(|start| (now - start).num_seconds());
            run.log_output = log_output.to_string();
            run.error_message = error_message.map(String::from);
        }
        Ok(())
    }

    async fn prune_run_logs(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        let mut runs = self.runs.lock().unwrap();
        let mut pruned = 0;
        for run in runs.values_mut() {
            if matches!(run.finished_at, Some(at) if at < cutoff) && !run.log_output.is_empty() {
                run.log_output.clear();
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

// =============================================================================
// Entity builders
// =============================================================================

pub fn project() -> Project {
    let now = chrono::Utc::now();
    Project {
        id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        name: "demo-app".to_string(),
        description: None,
        repo_url: "https://example.com/demo-app.git".to_string(),
        branch: "main".to_string(),
        build_path: "./".to_string(),
        deploy_path: None,
        credential_id: None,
        status: "active".to_string(),
        created_at: now,
        updated_at: now,
    }
}

pub fn pipeline(project_id: Uuid, spec: &str) -> Pipeline {
    let now = chrono::Utc::now();
    Pipeline {
        id: Uuid::new_v4(),
        project_id,
        name: "demo-pipeline".to_string(),
        description: None,
        spec: spec.to_string(),
        trigger: TriggerKind::Manual,
        cron_expr: None,
        status: "active".to_string(),
        created_at: now,
        updated_at: now,
    }
}

/// A one-stage, one-step spec running `script`.
pub fn script_spec(script: &str) -> String {
    serde_json::json!({
        "stages": [
            { "name": "build",
              "steps": [
                { "name": "run", "type": "script", "config": { "script": script } } ] }
        ]
    })
    .to_string()
}

/// Polls until the run reaches a terminal status or the timeout elapses.
pub async fn wait_terminal(store: &MemoryStore, run_id: Uuid, timeout: Duration) -> PipelineRun {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Some(run) = store.run(run_id) {
            if run.status.is_terminal() {
                return run;
            }
        }
        assert!(
            std::time::Instant::now() < deadline,
            "run {} did not reach a terminal status in {:?}",
            run_id,
            timeout
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
