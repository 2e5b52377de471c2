//! Settlement sweeper binary
//!
//! Hosts retry sweeps, window queue drains and periodic reconciliation
//! against in-process mock rails.

use anyhow::Context;
use rail_settlement::{AdapterRegistry, EngineConfig, SettlementEngine, TracingEventSink};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if std::env::var("SETTLEMENT_LOG_JSON").map_or(false, |v| v == "1" || v == "true") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting settlement sweeper");

    let config = EngineConfig::from_env().context("loading settlement configuration")?;
    let (adapters, _mocks) = AdapterRegistry::with_mocks();
    let engine = Arc::new(
        SettlementEngine::in_memory(config, adapters, Arc::new(TracingEventSink))
            .context("building settlement engine")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = engine.clone().start_scheduler(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down settlement sweeper");

    shutdown_tx.send(true).ok();
    scheduler.await.context("joining sweep scheduler")?;
    Ok(())
}
