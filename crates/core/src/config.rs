// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Configuration Module
// Persisted settings, tunnels and entrypoints, and the snapshot store around them

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::stats::ServiceStats;

/// File name of the persisted document inside the data directory
pub const CONFIG_FILE: &str = "config.toml";

/// Complete persisted configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,
    pub log: LogConfig,
    pub relay: RelayConfig,
    pub tunnels: Vec<TunnelConfig>,
    pub entrypoints: Vec<TunnelConfig>,
}

impl Config {
    /// Read the document at `path` without logging; `None` if missing or invalid
    pub fn read(path: &Path) -> Option<Config> {
        let contents = fs::read_to_string(path).ok()?;
        toml::from_str(&contents).ok()
    }
}

/// User interface preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lang: String,
    pub theme: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Public relay the tunnels register with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Domain under which tunnels get their public address
    pub domain: String,
    /// TLS server name used when dialing the relay
    pub server_name: String,
    /// Relay address
    pub server_addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            domain: "gost.plus".to_string(),
            server_name: "tunnel.gost.plus".to_string(),
            server_addr: "tunnel.gost.plus:443".to_string(),
        }
    }
}

/// One persisted tunnel or entrypoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Variant tag (file, http, tcp, udp)
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub enable_tls: bool,
    #[serde(default)]
    pub keepalive: bool,
    /// UDP session idle timeout in seconds
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: ServiceStats,
}

/// Default data directory (`<data dir>/gost-plus`, or the working directory)
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("gost-plus"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Process-wide configuration snapshot with durable storage
///
/// Readers get their own copy from [`ConfigStore::get`] and hand a whole
/// document back through [`ConfigStore::set`]. [`ConfigStore::update`] does
/// the same in one step without racing other writers.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Config>,
    write_lock: Mutex<()>,
    /// Set when the file on disk could not be parsed; blocks saving over it
    load_error: Option<String>,
}

impl ConfigStore {
    /// Open the store in `dir`, loading `config.toml`.
    ///
    /// A missing file is created with defaults. A file that cannot be parsed
    /// is left alone and the defaults are used in memory; [`ConfigStore::save`]
    /// then refuses to write until the store is reopened over a valid file.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(CONFIG_FILE);

        let (config, write_defaults, load_error) = match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from: {}", path.display());
                    (config, false, None)
                }
                Err(e) => {
                    error!("Failed to parse {}: {}", path.display(), e);
                    error!("Changes will not be saved until the file is fixed");
                    (Config::default(), false, Some(e.to_string()))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration found, using defaults");
                (Config::default(), true, None)
            }
            Err(e) => return Err(e.into()),
        };

        let store = Self {
            path,
            current: RwLock::new(config),
            write_lock: Mutex::new(()),
            load_error,
        };
        if write_defaults {
            store.save()?;
        }
        Ok(store)
    }

    /// Path of the persisted document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current snapshot
    pub fn get(&self) -> Config {
        self.current.read().clone()
    }

    /// Replace the current snapshot
    pub fn set(&self, config: Config) {
        *self.current.write() = config;
    }

    /// Modify the current snapshot in place and return a copy of the result
    pub fn update<F>(&self, f: F) -> Config
    where
        F: FnOnce(&mut Config),
    {
        let mut current = self.current.write();
        f(&mut current);
        current.clone()
    }

    /// Durably write the current snapshot
    pub fn save(&self) -> Result<()> {
        if let Some(reason) = &self.load_error {
            return Err(Error::Config(format!(
                "refusing to overwrite unparseable {}: {}",
                self.path.display(),
                reason
            )));
        }

        let _guard = self.write_lock.lock();
        let contents = toml::to_string_pretty(&self.get())?;

        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, contents)?;

        // Records carry passwords
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
