// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Registry Module
// Ordered, lock-protected collections of tunnels and entrypoints

use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigStore, TunnelConfig};
use crate::entrypoint::new_entrypoint;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::tunnel::{new_tunnel, Backend, State, Tunnel};

/// Which config section a registry round-trips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Tunnels,
    EntryPoints,
}

impl Section {
    fn records(self, config: &Config) -> &Vec<TunnelConfig> {
        match self {
            Section::Tunnels => &config.tunnels,
            Section::EntryPoints => &config.entrypoints,
        }
    }

    fn records_mut(self, config: &mut Config) -> &mut Vec<TunnelConfig> {
        match self {
            Section::Tunnels => &mut config.tunnels,
            Section::EntryPoints => &mut config.entrypoints,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Tunnels => write!(f, "tunnels"),
            Section::EntryPoints => write!(f, "entrypoints"),
        }
    }
}

/// Persisted form of a live entry
pub fn record_of(entry: &dyn Tunnel) -> TunnelConfig {
    let options = entry.options();
    TunnelConfig {
        id: options.id.clone(),
        name: options.name.clone(),
        kind: entry.kind().to_string(),
        endpoint: options.endpoint.clone(),
        hostname: options.hostname.clone(),
        username: options.username.clone(),
        password: options.password.clone(),
        enable_tls: options.enable_tls,
        keepalive: options.keepalive,
        ttl: options.ttl.as_secs(),
        favorite: entry.is_favorite(),
        closed: entry.is_closed(),
        created_at: options.created_at,
        stats: entry.stats(),
    }
}

/// Ordered collection of tunnels or entrypoints
///
/// Deleted entries leave a hole so positions handed out earlier stay valid.
/// Cloning shares the same underlying collection.
#[derive(Clone)]
pub struct Registry {
    section: Section,
    slots: Arc<RwLock<Vec<Option<Arc<dyn Tunnel>>>>>,
    store: Arc<ConfigStore>,
    backend: Backend,
}

impl Registry {
    pub fn new(section: Section, store: Arc<ConfigStore>, backend: Backend) -> Self {
        Self {
            section,
            slots: Arc::new(RwLock::new(Vec::new())),
            store,
            backend,
        }
    }

    pub fn section(&self) -> Section {
        self.section
    }

    /// Construct an instance of this registry's kind from its type tag
    pub fn create(&self, kind: &str, options: Options) -> Result<Arc<dyn Tunnel>> {
        match self.section {
            Section::Tunnels => new_tunnel(kind, options, self.backend.clone()),
            Section::EntryPoints => new_entrypoint(kind, options, self.backend.clone()),
        }
    }

    /// Number of slots, holes included
    pub async fn count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Append an entry. Ids are expected to be unique.
    pub async fn add(&self, entry: Arc<dyn Tunnel>) {
        let mut slots = self.slots.write().await;
        if slots.iter().flatten().any(|e| e.id() == entry.id()) {
            warn!("{} already holds an entry with id {}", self.section, entry.id());
        }
        slots.push(Some(entry));
    }

    pub async fn get_by_index(&self, index: usize) -> Option<Arc<dyn Tunnel>> {
        self.slots.read().await.get(index).cloned().flatten()
    }

    /// First live entry with `id`
    pub async fn get_by_id(&self, id: &str) -> Option<Arc<dyn Tunnel>> {
        self.slots
            .read()
            .await
            .iter()
            .flatten()
            .find(|e| e.id() == id)
            .cloned()
    }

    /// Live entries in index order
    pub async fn entries(&self) -> Vec<Arc<dyn Tunnel>> {
        self.slots.read().await.iter().flatten().cloned().collect()
    }

    /// Swap in `entry` at the position of the entry with the same id.
    ///
    /// The favorite flag of the replaced entry wins. Returns the replaced
    /// entry; when the id is unknown nothing happens and `None` is returned.
    pub async fn replace(&self, entry: Arc<dyn Tunnel>) -> Option<Arc<dyn Tunnel>> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(e) if e.id() == entry.id()))?;

        if let Some(old) = slot.as_ref() {
            entry.set_favorite(old.is_favorite());
        }
        slot.replace(entry)
    }

    /// Swap `fresh` into the slot only if it still holds `current`
    async fn replace_current(&self, current: &Arc<dyn Tunnel>, fresh: Arc<dyn Tunnel>) -> bool {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(e) if Arc::ptr_eq(e, current)))
        else {
            return false;
        };

        fresh.set_favorite(current.is_favorite());
        *slot = Some(fresh);
        true
    }

    /// Close and remove the entry with `id`, leaving a hole
    pub async fn delete(&self, id: &str) {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(e) if e.id() == id))
        else {
            return;
        };

        if let Some(entry) = slot.take() {
            if let Err(e) = entry.close() {
                warn!("Failed to close {} {}: {}", entry.kind(), id, e);
            }
            info!("Deleted {} entry {}", self.section, id);
        }
    }

    /// Populate from the persisted section, starting entries not marked closed.
    ///
    /// Records of unknown type are skipped. Returns how many entries were added.
    pub async fn load_from_config(&self) -> usize {
        let config = self.store.get();
        let mut loaded = 0;

        for record in self.section.records(&config) {
            let entry = match self.create(&record.kind, Options::from_record(record)) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping {} record {}: {}", self.section, record.id, e);
                    continue;
                }
            };
            entry.set_stats(record.stats.clone());

            if record.closed {
                let _ = entry.close();
            } else if let Err(e) = entry.run().await {
                warn!("Failed to start {} {}: {}", entry.kind(), entry.id(), e);
            }
            entry.set_favorite(record.favorite);

            self.add(entry).await;
            loaded += 1;
        }

        info!("Loaded {} {} from configuration", loaded, self.section);
        loaded
    }

    /// Rewrite the persisted section from the live entries and write it out
    pub async fn save_to_config(&self) -> Result<()> {
        let records: Vec<TunnelConfig> = self
            .entries()
            .await
            .iter()
            .map(|entry| record_of(entry.as_ref()))
            .collect();

        let section = self.section;
        self.store.update(|config| *section.records_mut(config) = records);

        if let Err(e) = self.store.save() {
            error!("Failed to save {}: {}", self.section, e);
            return Err(e);
        }
        debug!("Saved {} to {}", self.section, self.store.path().display());
        Ok(())
    }

    /// Start a stopped entry, or stop a running one.
    ///
    /// A never started entry is run in place. A closed entry is restarted as
    /// a fresh instance that takes its slot. Returns the entry now holding
    /// the id.
    pub async fn toggle(&self, id: &str) -> Result<Arc<dyn Tunnel>> {
        let current = self
            .get_by_id(id)
            .await
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        match current.state() {
            State::Running => {
                current.close()?;
                return Ok(current);
            }
            State::Constructed => {
                return match current.run().await {
                    Ok(()) | Err(Error::AlreadyRunning(_)) => Ok(current),
                    Err(e) => Err(e),
                };
            }
            State::Closed => {}
        }

        let fresh = current.renew();
        if !self.replace_current(&current, fresh.clone()).await {
            // Another toggle or edit took the slot first
            debug!("{} {} changed while toggling", self.section, id);
            return self
                .get_by_id(id)
                .await
                .ok_or_else(|| Error::NotFound(id.to_string()));
        }

        match fresh.run().await {
            Ok(()) | Err(Error::AlreadyRunning(_)) => Ok(fresh),
            Err(e) => {
                let _ = fresh.close();
                Err(e)
            }
        }
    }

    /// Replace the entry with the same id by `entry` and start it.
    ///
    /// The previous instance is closed first so the new one can take over
    /// its listeners.
    pub async fn update(&self, entry: Arc<dyn Tunnel>) -> Result<()> {
        let current = self
            .get_by_id(entry.id())
            .await
            .ok_or_else(|| Error::NotFound(entry.id().to_string()))?;

        let _ = current.close();
        entry.set_stats(current.stats());
        match self.replace(entry.clone()).await {
            None => {
                let _ = entry.close();
                return Err(Error::NotFound(entry.id().to_string()));
            }
            // A concurrent edit put its own instance in between
            Some(displaced) if !Arc::ptr_eq(&displaced, &current) => {
                let _ = displaced.close();
            }
            Some(_) => {}
        }
        if let Err(e) = entry.run().await {
            let _ = entry.close();
            return Err(e);
        }
        Ok(())
    }

    /// Close every live entry without removing it
    pub async fn close_all(&self) {
        for entry in self.entries().await {
            if let Err(e) = entry.close() {
                warn!("Failed to close {} {}: {}", entry.kind(), entry.id(), e);
            }
        }
    }
}
