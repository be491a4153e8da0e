// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Core Library
// Tunnel and entrypoint lifecycle, registries, task runner and configuration

pub mod config;
pub mod context;
pub mod entrypoint;
pub mod error;
pub mod forward;
pub mod options;
pub mod registry;
pub mod runner;
pub mod stats;
pub mod tunnel;

pub use config::{Config, ConfigStore, LogConfig, RelayConfig, Settings, TunnelConfig};
pub use context::{App, STATS_INTERVAL};
pub use entrypoint::{new_entrypoint, ENTRYPOINT_TYPES};
pub use error::{Error, Result};
pub use forward::{LocalBuilder, ServiceBuilder};
pub use options::{endpoint_token, Options};
pub use registry::{Registry, Section};
pub use runner::{ExecOptions, Runner, Task, TaskEvent, TaskId, TASK_UPDATE_STATS};
pub use stats::{CounterSnapshot, ServiceStats};
pub use tunnel::{new_tunnel, Backend, EntryPoint, State, Tunnel, TUNNEL_TYPES};
