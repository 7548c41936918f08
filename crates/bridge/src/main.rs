//! Telemetry Bridge - vehicle telemetry synchronization service
//!
//! Polls the local telemetry API and keeps every configured sink up to
//! date with the latest meaningfully-changed snapshot.

use anyhow::{Context, Result};
use bridge_lib::{
    health::{components, HealthRegistry},
    observability::{BridgeMetrics, StructuredLogger},
    source::HttpPollSource,
    DeadbandDetector, SyncEngine,
};
use std::sync::Arc;
use telemetry_bridge::{api, config::BridgeConfig};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting telemetry-bridge");

    let config = BridgeConfig::load()?;
    info!(vehicle = %config.vehicle_name, "Bridge configured");

    let sinks = config.sinks()?;

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::POLLER).await;
    for (sink, _) in &sinks {
        health_registry
            .register(&components::sink(sink.name()))
            .await;
    }

    let metrics = BridgeMetrics::new();
    let logger = StructuredLogger::new(&config.vehicle_name);

    let source = Arc::new(HttpPollSource::new(config.source_config())?);
    let source_url = source.url().to_string();

    let mut builder = SyncEngine::builder()
        .source(source)
        .detector(Arc::new(DeadbandDetector::new(config.deadband_config())))
        .config(config.engine_config())
        .metrics(metrics.clone())
        .health(health_registry.clone());
    for (sink, schedule) in sinks {
        builder = builder.sink(sink, schedule);
    }
    let engine = Arc::new(builder.build().context("Failed to build sync engine")?);

    logger.log_startup(BRIDGE_VERSION, &source_url, &engine.sink_names());

    // Start health, metrics and status server
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        engine.status_handle(),
    ));
    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    let report = engine.initial_sync().await;
    let have_snapshot = engine.store().latest().await.is_some();
    logger.log_initial_sync(have_snapshot, &report.delivered, &report.pending);
    health_registry.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let engine_handle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(shutdown_rx).await })
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    // Receivers may already be gone if the engine stopped on its own
    let _ = shutdown_tx.send(());
    if tokio::time::timeout(config.shutdown_grace(), engine_handle)
        .await
        .is_err()
    {
        warn!(
            grace_secs = config.shutdown_grace_secs,
            "Engine did not stop within the grace period"
        );
    }

    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}
