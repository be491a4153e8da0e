// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Periodic statistics refresh and config persistence

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::task::{Task, TaskId};
use crate::error::Result;
use crate::registry::Registry;

pub const TASK_UPDATE_STATS: TaskId = TaskId::from_static("service.stats.update");

/// Refreshes the stats of every running entry, then saves both registries
pub struct StatsTask {
    tunnels: Registry,
    entrypoints: Registry,
}

impl StatsTask {
    pub fn new(tunnels: Registry, entrypoints: Registry) -> Self {
        Self {
            tunnels,
            entrypoints,
        }
    }
}

/// Advance the stats of each running entry, in index order
async fn sweep(registry: &Registry) -> usize {
    let mut updated = 0;
    for index in 0..registry.count().await {
        let Some(entry) = registry.get_by_index(index).await else {
            continue;
        };
        let Some(live) = entry.counters() else {
            continue;
        };
        if let Some(stats) = entry.stats().advance(&live, Utc::now()) {
            entry.set_stats(stats);
            updated += 1;
        }
    }
    updated
}

#[async_trait]
impl Task for StatsTask {
    fn id(&self) -> TaskId {
        TASK_UPDATE_STATS
    }

    async fn run(&self, token: CancellationToken) -> Result<()> {
        let tunnels = sweep(&self.tunnels).await;
        let entrypoints = sweep(&self.entrypoints).await;
        trace!("Refreshed stats of {} tunnels, {} entrypoints", tunnels, entrypoints);

        // Shutdown writes the final state itself
        if token.is_cancelled() {
            return Ok(());
        }

        // Persist both even if one fails
        let saved_tunnels = self.tunnels.save_to_config().await;
        let saved_entrypoints = self.entrypoints.save_to_config().await;
        saved_tunnels.and(saved_entrypoints)
    }
}
