// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Daemon Config Module
// Handles daemon configuration (API bind address, data directory)
// Tunnels and entrypoints live in the core config store

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DaemonConfig {
    /// Bind address for the control API (loopback only, e.g. "127.0.0.1:7470")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Directory holding config.toml
    /// Default: <data dir>/gost-plus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

fn default_bind_address() -> String {
    "127.0.0.1:7470".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            data_dir: None,
        }
    }
}

/// Check if a host address is a loopback address
/// Supports IPv4 (127.x.x.x), IPv6 (::1), and hostname (localhost)
pub fn is_loopback_address(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return ip.is_loopback();
    }

    // Unparseable hosts are treated as non-loopback
    false
}

/// Whether a "host:port" bind address stays on this machine
fn is_loopback_bind(bind_address: &str) -> bool {
    if let Ok(addr) = bind_address.parse::<SocketAddr>() {
        return addr.ip().is_loopback();
    }
    let host = bind_address
        .rsplit_once(':')
        .map_or(bind_address, |(host, _)| host);
    is_loopback_address(host)
}

impl DaemonConfig {
    /// Validate the daemon configuration
    pub fn validate(&self) -> Result<()> {
        // The API has no authentication or encryption
        if !is_loopback_bind(&self.bind_address) {
            anyhow::bail!(
                "Security violation: the control API may only bind to loopback (bind_address: {}).\n\
                 Use 127.0.0.1, ::1 or localhost in daemon.toml.",
                self.bind_address
            );
        }
        Ok(())
    }

    /// Directory holding the tunnel configuration
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(gost_plus_core::config::default_data_dir)
    }

    /// Load daemon configuration from the default location
    ///
    /// Returns the configuration and whether defaults were written.
    pub fn load() -> Result<(Self, bool)> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load daemon configuration from `path`, writing defaults if missing
    pub fn load_from(path: &Path) -> Result<(Self, bool)> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok((config, true));
        }

        let contents = fs::read_to_string(path).context("Failed to read daemon configuration")?;

        let config: Self =
            toml::from_str(&contents).context("Failed to parse daemon configuration")?;

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok((config, false))
    }

    /// Save daemon configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }

        let contents =
            toml::to_string_pretty(self).context("Failed to serialize daemon configuration")?;

        fs::write(path, contents).context("Failed to write daemon configuration")?;

        Ok(())
    }

    /// Get the path to the daemon configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("gost-plus").join("daemon.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_loopback_address() {
        assert!(is_loopback_address("127.0.0.1"));
        assert!(is_loopback_address("127.255.255.255"));
        assert!(is_loopback_address("::1"));
        assert!(is_loopback_address("[::1]"));
        assert!(is_loopback_address("localhost"));
        assert!(is_loopback_address("LocalHost"));

        assert!(!is_loopback_address("0.0.0.0"));
        assert!(!is_loopback_address("192.168.1.1"));
        assert!(!is_loopback_address("example.com"));
        assert!(!is_loopback_address("::"));
    }

    #[test]
    fn test_validate_loopback() {
        for bind_address in ["127.0.0.1:7470", "localhost:7470", "[::1]:7470"] {
            let config = DaemonConfig {
                bind_address: bind_address.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_ok(), "{} should be allowed", bind_address);
        }
    }

    #[test]
    fn test_validate_non_loopback_rejected() {
        for bind_address in ["0.0.0.0:7470", "192.168.1.100:7470", "[::]:7470"] {
            let config = DaemonConfig {
                bind_address: bind_address.to_string(),
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("Security violation"));
        }
    }

    #[test]
    fn test_load_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("daemon.toml");

        let (config, created) = DaemonConfig::load_from(&path).unwrap();
        assert!(created);
        assert_eq!(config, DaemonConfig::default());
        assert!(path.exists());

        let (again, created) = DaemonConfig::load_from(&path).unwrap();
        assert!(!created);
        assert_eq!(again, config);
    }

    #[test]
    fn test_load_rejects_public_bind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.toml");
        fs::write(&path, "bind_address = \"0.0.0.0:7470\"\n").unwrap();

        assert!(DaemonConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_data_dir_override() {
        let config = DaemonConfig {
            data_dir: Some(PathBuf::from("/tmp/gost-plus-test")),
            ..Default::default()
        };
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/gost-plus-test"));
    }
}
