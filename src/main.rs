mod api;
mod collaborators;
mod config;
mod db;
mod detector;
mod error;
mod pipeline;
mod scorer;
mod store;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::store::{MemoryStore, SnapshotStore, SqliteStore};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Store setup ---
    let store: Arc<dyn SnapshotStore> = if cfg.db_path == ":memory:" {
        warn!("DB_PATH=:memory: selected, snapshots and queue will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::open(&cfg.db_path).await?)
    };

    // --- Collaborators ---
    let collab = Collaborators::from_config(&cfg)?;
    info!(
        registry = %cfg.registry_api_url,
        classifier = cfg.classifier_url.as_deref().unwrap_or("keywords"),
        selector = cfg.selector_url.as_deref().unwrap_or("priority"),
        enricher = cfg.enricher_url.as_deref().unwrap_or("none"),
        ranker = cfg.ranker_url.as_deref().unwrap_or("heuristic"),
        "collaborators configured"
    );

    let latency = Arc::new(LatencyStats::new());
    let health = Arc::new(HealthState::new());
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        collab,
        PipelineSettings::from(&cfg),
        Arc::clone(&latency),
        Arc::clone(&health),
    ));

    if cfg.run_once {
        let report = pipeline.run_once().await;
        store.close().await;
        if report.store_unavailable {
            return Err(AppError::Store("store unreachable, run skipped".to_string()));
        }
        return Ok(());
    }

    // Pipeline scheduler (background, every RUN_INTERVAL_SECS)
    let every = Duration::from_secs(cfg.run_interval_secs);
    info!("Pipeline scheduled every {}s", cfg.run_interval_secs);
    let scheduler = tokio::spawn(Arc::clone(&pipeline).run(every));

    // HTTP API server
    let api_state = ApiState {
        store: Arc::clone(&store),
        health,
        latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    store.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
