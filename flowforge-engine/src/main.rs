//! FlowForge daemon
//!
//! Wires the control plane together: configuration, the persistence
//! gateway, the pipeline engine, and the cron scheduler. The HTTP surface
//! lives in a separate layer and talks to the engine through its three
//! entry points (run, cancel, tail logs).

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowforge_engine::config::Config;
use flowforge_engine::engine::store::PgEngineStore;
use flowforge_engine::engine::Engine;
use flowforge_engine::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowforge_engine=info,flowforge_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting FlowForge engine");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        "Loaded configuration: data_path={:?}, max_concurrent_runs={}",
        config.data_path, config.max_concurrent_runs
    );

    info!("Connecting to database...");
    let pool = flowforge_store::db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    flowforge_store::db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store = Arc::new(PgEngineStore::new(pool.clone()));
    let engine = Engine::new(config.clone(), store);

    info!("Engine initialized");

    let scheduler = Scheduler::new();
    scheduler
        .register_cleanup(config.clone(), engine.store())
        .context("Failed to register cleanup job")?;

    // Re-register every schedule-triggered pipeline on boot.
    let scheduled = flowforge_store::repository::pipeline::list_scheduled(&pool)
        .await
        .context("Failed to list scheduled pipelines")?;

    for pipeline in &scheduled {
        if let Err(err) = scheduler.add_pipeline_job(pipeline, engine.clone()) {
            warn!("Skipping schedule for pipeline {} ({}): {}", pipeline.name, pipeline.id, err);
        }
    }

    info!("Registered {} scheduled pipeline(s)", scheduled.len());

    scheduler.start().map_err(|err| anyhow::anyhow!("{}", err))?;

    info!("FlowForge engine running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    let _ = scheduler.stop();

    Ok(())
}
