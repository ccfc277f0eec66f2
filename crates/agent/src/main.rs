//! Vibration Monitor - condition monitoring service
//!
//! Receives vibration and temperature readings from the sensor gateway,
//! rolls them up hourly and daily, scores resampled batches for anomalies
//! and serves history and live events over HTTP.

use anyhow::{Context, Result};
use monitor_agent::{api, config::MonitorConfig, logging, pipeline};
use monitor_lib::health::components;
use monitor_lib::{HealthRegistry, StructuredLogger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long to wait for tasks to finish after shutdown is signalled
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = MonitorConfig::load()?;
    let _log_guard = logging::init(config.log_dir.as_deref())?;

    info!("Starting vibration-monitor");

    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let logger = StructuredLogger::new(&config.site);
    let pipeline = pipeline::build(&config, health_registry.clone(), logger.clone())
        .context("Failed to assemble pipeline")?;
    logger.log_startup(MONITOR_VERSION, &pipeline.model_version);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let worker_handle = tokio::spawn(pipeline.worker.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        pipeline.ingest_tx,
        pipeline.events,
        pipeline.stores,
    ));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(SHUTDOWN_GRACE, worker_handle).await {
        Ok(Ok(stats)) => info!(
            processed = stats.processed,
            failed = stats.failed,
            "Ingestion worker finished"
        ),
        Ok(Err(e)) => error!(error = %e, "Ingestion worker panicked"),
        Err(_) => warn!("Ingestion worker did not stop in time"),
    }

    // Open event streams keep connections alive, so the server gets a bound too
    match tokio::time::timeout(SHUTDOWN_GRACE, api_handle).await {
        Ok(Ok(Err(e))) => error!(error = %e, "API server failed"),
        Ok(Err(e)) => error!(error = %e, "API server task panicked"),
        Err(_) => warn!("API server did not stop in time"),
        Ok(Ok(Ok(()))) => {}
    }

    Ok(())
}
