// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - PID File Management
// Two daemons over the same data directory would fight over listeners and config writes

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// PID file guard - removes the PID file on drop
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    /// Create the PID file at its default location
    pub fn create() -> Result<Self> {
        Self::create_at(Self::pid_file_path()?)
    }

    /// Create the PID file at `path`, failing if a live daemon owns it
    pub fn create_at(path: PathBuf) -> Result<Self> {
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(pid_str) => {
                    if let Ok(pid) = pid_str.trim().parse::<u32>() {
                        if pid != std::process::id() && Self::is_process_running(pid) {
                            anyhow::bail!(
                                "Daemon is already running with PID {}. \
                                 Stop the existing daemon first or remove {} if it's stale.",
                                pid,
                                path.display()
                            );
                        }
                        if pid == std::process::id() {
                            anyhow::bail!("PID file {} is already held by this process", path.display());
                        }
                        warn!("Found stale PID file for process {} (not running), removing it", pid);
                    }
                    fs::remove_file(&path).context("Failed to remove stale PID file")?;
                }
                Err(e) => {
                    warn!("Failed to read PID file {}: {}", path.display(), e);
                    let _ = fs::remove_file(&path);
                }
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create runtime directory")?;
        }

        let pid = std::process::id();
        fs::write(&path, pid.to_string()).context("Failed to write PID file")?;

        info!("Created PID file at {} with PID {}", path.display(), pid);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn pid_file_path() -> Result<PathBuf> {
        let runtime_dir = dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .ok_or_else(|| anyhow::anyhow!("Could not determine runtime directory"))?;

        Ok(runtime_dir.join("gost-plus").join("daemon.pid"))
    }

    /// Check if a process with the given PID is running
    #[cfg(unix)]
    fn is_process_running(pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // Signal 0 only checks for existence and permission
        let result = unsafe { libc::kill(pid, 0) };
        if result == 0 {
            return true;
        }
        // EPERM: exists but belongs to someone else
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_process_running(_pid: u32) -> bool {
        warn!("Process existence check not implemented for this platform");
        true
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(_) => debug!("Removed PID file: {}", self.path.display()),
            Err(e) => warn!("Failed to remove PID file {}: {}", self.path.display(), e),
        }
    }
}
