//! Node health watcher.
//!
//! Watches node readiness in a Kubernetes cluster, debounces bursts of
//! readiness transitions into single events and forwards them to Airflow
//! and/or a GitHub repository dispatch webhook, keeping an append-only
//! incident log.

mod config;
mod debounce;
mod dispatch;
mod incident;
mod readiness;
mod watcher;
mod web;

use config::{LogFormat, WatcherConfig};
use dispatch::Dispatcher;
use incident::{IncidentLog, IncidentRecorder};
use watcher::{NodeWatcher, WatcherState};
use web::{AppState, Server};

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Resolves with the signal name on SIGINT or SIGTERM.
///
/// The SIGTERM handler is installed before this returns, so a pod stop that
/// arrives while startup is still running is not lost.
fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            terminate.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => "SIGINT",
            _ = terminate => "SIGTERM",
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let cfg = WatcherConfig::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match cfg.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!(
        cluster = %cfg.cluster_name,
        debounce_seconds = cfg.watch_debounce.as_secs(),
        "Starting node health watcher"
    );

    let stop_signal = shutdown_signal()?;
    let dispatcher = Dispatcher::from_config(&cfg)?;
    let (recorder, recorder_task) = IncidentRecorder::spawn(IncidentLog::new(&cfg.incident_log_path));

    let client = watcher::connect().await?;
    let state = Arc::new(WatcherState::new());

    let (update_tx, update_rx) = mpsc::channel(1024);
    let (event_tx, event_rx) = mpsc::channel(64);

    let source_task = tokio::spawn(watcher::run_node_source(client, update_tx));
    let node_watcher = NodeWatcher::new(&cfg.cluster_name, cfg.watch_debounce, state.clone(), event_tx);
    let watcher_task = tokio::spawn(node_watcher.run(update_rx));
    let delivery_task = tokio::spawn(watcher::run_delivery(event_rx, dispatcher.clone(), recorder));

    // Status server runs until shutdown is signalled
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = Server::new(
        cfg.http_port,
        AppState {
            cluster: cfg.cluster_name.clone(),
            endpoints: dispatcher.endpoint_names(),
            watcher: state,
        },
    );
    let server_task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.changed().await;
        };
        if let Err(e) = server.start(shutdown).await {
            tracing::error!("Status server failed: {}", e);
        }
    });

    let signal = stop_signal.await;
    tracing::info!(signal, "Shutdown requested");

    // Stopping the source closes the update channel; the watcher flushes any
    // open window and the delivery task drains in-flight dispatches.
    source_task.abort();
    let _ = source_task.await;
    watcher_task.await?;
    delivery_task.await?;
    recorder_task.await?;

    let _ = shutdown_tx.send(true);
    server_task.await?;

    tracing::info!("Node health watcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_starts_shutdown() {
        let shutdown = shutdown_signal().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let signal = tokio::time::timeout(Duration::from_secs(5), shutdown).await.unwrap();
        assert_eq!(signal, "SIGTERM");
    }
}
