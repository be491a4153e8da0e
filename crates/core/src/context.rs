// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Application Context
// Owns the config store, both registries and the task runner

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ConfigStore;
use crate::error::Result;
use crate::forward::ServiceBuilder;
use crate::registry::{Registry, Section};
use crate::runner::{ExecOptions, Runner, StatsTask};
use crate::tunnel::Backend;

/// How often stats are refreshed and the config written
pub const STATS_INTERVAL: Duration = Duration::from_secs(1);

pub struct App {
    pub config: Arc<ConfigStore>,
    pub tunnels: Registry,
    pub entrypoints: Registry,
    pub runner: Arc<Runner>,
    shutdown: CancellationToken,
}

impl App {
    /// Open the config in `data_dir` and create empty registries over it
    pub fn new(data_dir: impl AsRef<Path>, builder: Arc<dyn ServiceBuilder>) -> Result<Self> {
        let config = Arc::new(ConfigStore::open(data_dir)?);
        let backend = Backend::new(builder, config.get().relay);

        Ok(Self {
            tunnels: Registry::new(Section::Tunnels, config.clone(), backend.clone()),
            entrypoints: Registry::new(Section::EntryPoints, config.clone(), backend),
            runner: Arc::new(Runner::new()),
            shutdown: CancellationToken::new(),
            config,
        })
    }

    /// Load persisted entries and schedule the stats task
    pub async fn start(&self, stats_interval: Duration) -> Result<()> {
        let tunnels = self.tunnels.load_from_config().await;
        let entrypoints = self.entrypoints.load_from_config().await;
        info!("Started with {} tunnels and {} entrypoints", tunnels, entrypoints);

        let task = Arc::new(StatsTask::new(self.tunnels.clone(), self.entrypoints.clone()));
        self.runner
            .exec(
                &self.shutdown,
                task,
                ExecOptions::default()
                    .background(true)
                    .interval(stats_interval)
                    .cancel_existing(true),
            )
            .await
    }

    /// Stop scheduled tasks, persist both registries, then close every entry
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        // A stats tick already past its cancellation check still saves
        self.runner.stop().await;

        // Save before closing so running entries come back on next start
        for registry in [&self.tunnels, &self.entrypoints] {
            if let Err(e) = registry.save_to_config().await {
                warn!("Failed to save {} on shutdown: {}", registry.section(), e);
            }
            registry.close_all().await;
        }
        info!("All tunnels and entrypoints closed");
    }
}
