//! Cron scheduler
//!
//! Second-precision cron dispatch with a process-wide job registry. Each
//! job runs on its own task that sleeps until the next occurrence of its
//! schedule; jobs only fire while the scheduler is started. `add_job` is
//! idempotent on id: an existing job with the same id is replaced
//! atomically.
//!
//! A well-known `cleanup` job prunes stale workspaces and expired run logs
//! every night.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use flowforge_core::domain::pipeline::{Pipeline, TriggerKind};

use crate::config::Config;
use crate::engine::store::EngineStore;
use crate::engine::Engine;
use crate::error::{EngineError, Result};

/// Schedule of the well-known housekeeping job: daily at 02:00.
pub const CLEANUP_SPEC: &str = "0 0 2 * * *";

/// A scheduled callback. Each firing gets a fresh future.
pub type JobFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Introspection view of a registered job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub id: String,
    pub spec: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct JobTimes {
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
}

struct ScheduledJob {
    spec: String,
    times: Arc<Mutex<JobTimes>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Cron-driven job dispatcher.
pub struct Scheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    running_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (running_tx, _) = watch::channel(false);
        Self { jobs: Mutex::new(HashMap::new()), running_tx }
    }

    /// Starts dispatching. Jobs added earlier begin firing from now on.
    pub fn start(&self) -> Result<()> {
        if *self.running_tx.borrow() {
            return Err(EngineError::Internal("scheduler is already running".to_string()));
        }
        let _ = self.running_tx.send(true);
        info!("Scheduler started");
        Ok(())
    }

    /// Stops dispatching; registered jobs stay in place.
    pub fn stop(&self) -> Result<()> {
        if !*self.running_tx.borrow() {
            return Err(EngineError::Internal("scheduler is not running".to_string()));
        }
        let _ = self.running_tx.send(false);
        info!("Scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        *self.running_tx.borrow()
    }

    /// Registers (or atomically replaces) a job under `id`.
    pub fn add_job(&self, id: &str, spec: &str, job: JobFn) -> Result<()> {
        let schedule = cron::Schedule::from_str(spec).map_err(|err| {
            EngineError::Validation(format!("invalid cron expression '{}': {}", spec, err))
        })?;

        let times = Arc::new(Mutex::new(JobTimes::default()));
        let handle = tokio::spawn(job_loop(
            schedule,
            Arc::clone(&times),
            self.running_tx.subscribe(),
            job,
        ));

        let mut jobs = self.jobs.lock().unwrap();
        if let Some(previous) = jobs.insert(
            id.to_string(),
            ScheduledJob { spec: spec.to_string(), times, handle },
        ) {
            previous.handle.abort();
        }

        info!("Job {} added with spec: {}", id, spec);
        Ok(())
    }

    /// Removes the job registered under `id`.
    pub fn remove_job(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.remove(id) {
            Some(job) => {
                job.handle.abort();
                info!("Job {} removed", id);
                Ok(())
            }
            None => Err(EngineError::NotFound(format!("job {}", id))),
        }
    }

    /// Snapshot of every registered job.
    pub fn jobs(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.lock().unwrap();
        jobs.iter()
            .map(|(id, job)| {
                let times = *job.times.lock().unwrap();
                JobInfo {
                    id: id.clone(),
                    spec: job.spec.clone(),
                    last_run: times.last_run,
                    next_run: times.next_run,
                }
            })
            .collect()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Registers the cron trigger for a schedule-based pipeline.
    pub fn add_pipeline_job(&self, pipeline: &Pipeline, engine: Engine) -> Result<()> {
        let expr = pipeline
            .cron_expr
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                EngineError::Validation("pipeline cron expression is empty".to_string())
            })?;

        let pipeline_id = pipeline.id;
        let name = pipeline.name.clone();

        self.add_job(
            &pipeline_job_id(pipeline_id),
            expr,
            Arc::new(move || {
                let engine = engine.clone();
                let name = name.clone();
                Box::pin(async move {
                    info!("Executing scheduled pipeline: {} ({})", name, pipeline_id);
                    // Scheduled runs are attributed to the system actor.
                    match engine.run(pipeline_id, TriggerKind::Schedule, Uuid::nil()).await {
                        Ok(run) => info!("Scheduled run {} launched for {}", run.id, name),
                        Err(err) => error!("Scheduled run of {} rejected: {}", name, err),
                    }
                })
            }),
        )
    }

    /// Removes a pipeline's cron trigger.
    pub fn remove_pipeline_job(&self, pipeline_id: Uuid) -> Result<()> {
        self.remove_job(&pipeline_job_id(pipeline_id))
    }

    /// Installs the well-known housekeeping job.
    pub fn register_cleanup(&self, config: Config, store: Arc<dyn EngineStore>) -> Result<()> {
        self.add_job(
            "cleanup",
            CLEANUP_SPEC,
            Arc::new(move || {
                let config = config.clone();
                let store = Arc::clone(&store);
                Box::pin(async move {
                    run_cleanup(&config, store).await;
                })
            }),
        )
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn pipeline_job_id(pipeline_id: Uuid) -> String {
    format!("pipeline_{}", pipeline_id)
}

async fn job_loop(
    schedule: cron::Schedule,
    times: Arc<Mutex<JobTimes>>,
    mut running_rx: watch::Receiver<bool>,
    job: JobFn,
) {
    loop {
        // Park until the scheduler is started. A closed channel means the
        // scheduler itself is gone.
        while !*running_rx.borrow() {
            if running_rx.changed().await.is_err() {
                return;
            }
        }

        let now = Utc::now();
        let next = match schedule.after(&now).next() {
            Some(next) => next,
            None => return,
        };
        times.lock().unwrap().next_run = Some(next);

        let delay = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                if *running_rx.borrow() {
                    times.lock().unwrap().last_run = Some(Utc::now());
                    job().await;
                }
            }
            changed = running_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                // Started/stopped; recompute the next occurrence.
            }
        }
    }
}

/// Housekeeping: drop workspaces untouched for longer than the retention
/// window and blank expired run log blobs.
async fn run_cleanup(config: &Config, store: Arc<dyn EngineStore>) {
    info!("Starting cleanup job");

    let cutoff = Utc::now() - chrono::Duration::days(config.cleanup_after_days);

    match sweep_stale_dirs(&config.workspaces_root(), cutoff).await {
        Ok(removed) if removed > 0 => info!("Removed {} stale workspace(s)", removed),
        Ok(_) => {}
        Err(err) => warn!("Workspace sweep failed: {}", err),
    }

    match store.prune_run_logs(cutoff).await {
        Ok(pruned) if pruned > 0 => info!("Pruned logs of {} expired run(s)", pruned),
        Ok(_) => {}
        Err(err) => warn!("Run log pruning failed: {:#}", err),
    }

    info!("Cleanup job completed");
}

async fn sweep_stale_dirs(
    root: &std::path::Path,
    cutoff: DateTime<Utc>,
) -> std::io::Result<usize> {
    if !root.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(root).await?;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_dir() {
            continue;
        }

        let modified: DateTime<Utc> = match metadata.modified() {
            Ok(time) => time.into(),
            Err(_) => continue,
        };

        if modified < cutoff {
            if let Err(err) = tokio::fs::remove_dir_all(entry.path()).await {
                warn!("Failed to remove stale workspace {:?}: {}", entry.path(), err);
            } else {
                removed += 1;
            }
        }
    }

    Ok(removed)
}
