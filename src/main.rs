use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use job_orchestrator::backend::DryRunBackend;
use job_orchestrator::config::OrchestratorConfig;
use job_orchestrator::dispatch::JobDispatcher;
use job_orchestrator::persistence::{FileStore, PendingSnapshot};

const STATE_DIR_VAR: &str = "JOB_ORCHESTRATOR_STATE_DIR";
const DEFAULT_STATE_DIR: &str = "./state";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "job_orchestrator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = OrchestratorConfig::from_env();
    let state_dir = std::env::var_os(STATE_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
    tokio::fs::create_dir_all(&state_dir)
        .await
        .with_context(|| format!("creating state directory {}", state_dir.display()))?;
    let store = Arc::new(FileStore::new(state_dir));

    let snapshot = PendingSnapshot::load_from(store.as_ref())
        .await
        .context("loading pending requests")?;
    tracing::info!(pending = snapshot.len(), dir = %store.dir().display(), "Loaded state");

    let (outbound, mut actions) = mpsc::channel(config.channel_buffer);
    let dispatcher = JobDispatcher::new(Arc::new(DryRunBackend::new()), config, outbound);
    let persister = dispatcher.spawn_persister(Arc::clone(&store));

    let sink = tokio::spawn(async move {
        while let Some(action) = actions.recv().await {
            tracing::info!(
                feature = %action.feature,
                action = action.kind.name(),
                "Dispatched action"
            );
        }
    });

    let resumed = dispatcher
        .rehydrate(&snapshot)
        .await
        .context("resuming pending jobs")?;
    tracing::info!(resumed, "Orchestrator ready");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutting down");

    drop(dispatcher);
    sink.abort();
    persister.abort();
    Ok(())
}
