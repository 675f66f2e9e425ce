//! Container stats exporter
//!
//! Polls the local container runtime and exposes per-container CPU, memory,
//! storage and network counters in Prometheus text format.

use anyhow::{Context, Result};
use exporter_lib::{
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    DockerClient, ReconciliationLoopBuilder, Scheduler,
};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The HTTP server did not drain within the grace period
#[derive(Debug, thiserror::Error)]
#[error("shutdown timed out after {0:?}")]
struct ShutdownTimeout(Duration);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting stats-exporter");

    let config = config::ExporterConfig::load()?;
    info!(
        node_name = %config.node_name,
        socket = %config.docker_socket.display(),
        orchestrator_mode = config.orchestrator_mode,
        "Exporter configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::RUNTIME).await;

    let registry = Registry::new();
    let logger = StructuredLogger::new(config.node_name.clone());
    logger.log_startup(EXPORTER_VERSION, config.poll_interval_secs, config.port);

    let runtime = DockerClient::new(&config.docker_socket).with_timeout(config.runtime_timeout());
    let reconciler = ReconciliationLoopBuilder::new()
        .runtime(Arc::new(runtime))
        .label_mode(config.label_mode())
        .cpu_ticks_per_second(config.cpu_ticks_per_second)
        .registry(registry.clone())
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()
        .context("Failed to build reconciliation loop")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let scheduler = Scheduler::new(reconciler, config.poll_interval(), health_registry.clone());
    let mut scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(health_registry, registry));
    let mut api_shutdown = shutdown_tx.subscribe();
    let mut api_handle = tokio::spawn(api::serve(config.port, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            logger.log_shutdown("signal received");
            let _ = shutdown_tx.send(());

            // Let an in-flight cycle finish before closing the listener
            match scheduler_handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Scheduler failed during shutdown"),
                Err(e) => error!(error = %e, "Scheduler task panicked"),
            }
        }
        result = &mut scheduler_handle => {
            logger.log_shutdown("scheduler stopped");
            let _ = shutdown_tx.send(());
            drain(api_handle, config.shutdown_grace()).await?;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("Reconciliation failed"),
                Err(e) => Err(e).context("Scheduler task panicked"),
            };
        }
        result = &mut api_handle => {
            let _ = shutdown_tx.send(());
            let _ = scheduler_handle.await;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.context("API server failed")),
                Err(e) => Err(e).context("API server task panicked"),
            };
        }
    }

    drain(api_handle, config.shutdown_grace()).await?;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for the API server to finish within the grace period
async fn drain(
    api_handle: tokio::task::JoinHandle<Result<()>>,
    grace: Duration,
) -> Result<()> {
    match tokio::time::timeout(grace, api_handle).await {
        Ok(joined) => joined.context("API server task panicked")?,
        Err(_) => {
            let err = ShutdownTimeout(grace);
            error!(error = %err, "API server did not stop in time");
            Err(err.into())
        }
    }
}

/// Resolve on SIGINT, or SIGTERM on unix
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
