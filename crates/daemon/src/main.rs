// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Daemon
// Runs the tunnels and entrypoints and serves the control API

mod api;
mod config;
mod pidfile;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gost_plus_core::config::CONFIG_FILE;
use gost_plus_core::{
    App, Config, LocalBuilder, LogConfig, TaskEvent, STATS_INTERVAL, TASK_UPDATE_STATS,
};

use api::{create_router, AppState, OutgoingEvent};
use config::DaemonConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load daemon configuration before logging so the log settings can be read
    let (daemon_config, created) = DaemonConfig::load()?;
    let data_dir = daemon_config.data_dir();

    let log_config = Config::read(&data_dir.join(CONFIG_FILE))
        .map(|config| config.log)
        .unwrap_or_default();
    init_logging(&log_config);

    info!("Gost Plus Daemon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if created {
        info!("Wrote default daemon configuration");
    }
    info!("Data directory: {}", data_dir.display());

    // Create PID file to prevent multiple instances
    let _pid_guard = pidfile::PidFileGuard::create()
        .context("Failed to create PID file - another daemon may already be running")?;

    let app = Arc::new(
        App::new(&data_dir, Arc::new(LocalBuilder::new()))
            .context("Failed to open configuration")?,
    );
    app.start(STATS_INTERVAL)
        .await
        .context("Failed to schedule the stats task")?;

    let (events_tx, _) = broadcast::channel(64);
    let (shutdown_tx, _) = broadcast::channel(1);

    if let Some(events) = app.runner.events() {
        tokio::spawn(forward_task_events(events, events_tx.clone()));
    }

    let state = Arc::new(AppState {
        app: app.clone(),
        events_tx,
        shutdown_tx: shutdown_tx.clone(),
    });
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&daemon_config.bind_address)
        .await
        .context(format!("Failed to bind to {}", daemon_config.bind_address))?;
    info!("Daemon listening on {}", daemon_config.bind_address);
    info!("Daemon started successfully");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(app, shutdown_tx))
        .await
        .context("HTTP server error")?;

    info!("Daemon shut down");
    Ok(())
}

fn init_logging(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "gost_plus_daemon={level},gost_plus_core={level},tower_http=warn",
            level = log.level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if log.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Relay runner events to SSE subscribers
async fn forward_task_events(
    mut events: mpsc::Receiver<TaskEvent>,
    events_tx: broadcast::Sender<OutgoingEvent>,
) {
    while let Some(event) = events.recv().await {
        let outgoing = match event.error {
            Some(error) => {
                error!("Task {} failed: {}", event.task_id, error);
                OutgoingEvent::TaskFailed {
                    task: event.task_id.to_string(),
                    error,
                }
            }
            None if event.task_id == TASK_UPDATE_STATS => OutgoingEvent::StatsUpdated {
                timestamp: Utc::now(),
            },
            None => continue,
        };
        // No subscribers is fine
        let _ = events_tx.send(outgoing);
    }
}

/// Wait for Ctrl+C or SIGTERM, then save and close everything
async fn shutdown_signal(app: Arc<App>, shutdown_tx: broadcast::Sender<()>) {
    wait_for_signal().await;

    app.shutdown().await;
    // Signal all SSE streams to close
    let _ = shutdown_tx.send(());
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}
