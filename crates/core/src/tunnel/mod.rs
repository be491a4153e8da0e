// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Tunnel Module
// Services exposing a local resource on the public relay

mod file;
mod http;
mod lifecycle;
mod tcp;
mod udp;

pub use file::FileTunnel;
pub use http::HttpTunnel;
pub use lifecycle::{Lifecycle, State};
pub use tcp::TcpTunnel;
pub use udp::UdpTunnel;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::forward::{ChainConfig, ServiceBuilder};
use crate::options::Options;
use crate::stats::{CounterSnapshot, ServiceStats};

/// Type tags accepted by [`new_tunnel`]
pub const TUNNEL_TYPES: [&str; 4] = ["file", "http", "tcp", "udp"];

/// Forwarding backend and relay settings shared by every instance
#[derive(Clone)]
pub struct Backend {
    pub builder: Arc<dyn ServiceBuilder>,
    pub relay: RelayConfig,
}

impl Backend {
    pub fn new(builder: Arc<dyn ServiceBuilder>, relay: RelayConfig) -> Self {
        Self { builder, relay }
    }

    /// `<token>.<domain>`
    pub fn public_host(&self, options: &Options) -> String {
        format!("{}.{}", options.token(), self.relay.domain)
    }

    pub fn chain(&self, name: &str, tunnel_id: &str) -> ChainConfig {
        ChainConfig::for_tunnel(name, tunnel_id, &self.relay)
    }
}

/// A runnable forwarding unit: one of the tunnel or entrypoint variants
///
/// Only `run` and the identity accessors differ per variant; run state,
/// favorite flag, stats and last error live in the shared [`Lifecycle`].
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Variant tag
    fn kind(&self) -> &'static str;

    fn options(&self) -> &Options;

    fn lifecycle(&self) -> &Lifecycle;

    /// Local resource for tunnels, relay address for entrypoints
    fn endpoint(&self) -> String;

    /// Public address for tunnels, local listen address for entrypoints
    fn entrypoint(&self) -> String;

    /// Build the forwarding services and start serving
    async fn run(&self) -> Result<()>;

    /// Fresh, never run instance with the same options, favorite and stats
    fn renew(&self) -> Arc<dyn Tunnel>;

    fn id(&self) -> &str {
        &self.options().id
    }

    fn name(&self) -> &str {
        &self.options().name
    }

    fn close(&self) -> Result<()> {
        self.lifecycle().close()
    }

    fn is_closed(&self) -> bool {
        self.lifecycle().is_closed()
    }

    fn state(&self) -> State {
        self.lifecycle().state()
    }

    fn set_favorite(&self, favorite: bool) {
        self.lifecycle().set_favorite(favorite)
    }

    fn is_favorite(&self) -> bool {
        self.lifecycle().is_favorite()
    }

    fn err(&self) -> Option<String> {
        self.lifecycle().err()
    }

    fn stats(&self) -> ServiceStats {
        self.lifecycle().stats()
    }

    fn set_stats(&self, stats: ServiceStats) {
        self.lifecycle().set_stats(stats)
    }

    /// Live counters; `None` unless running
    fn counters(&self) -> Option<CounterSnapshot> {
        self.lifecycle().counters()
    }
}

/// Entrypoints share the tunnel interface
pub type EntryPoint = dyn Tunnel;

/// Construct a tunnel variant from its type tag
pub fn new_tunnel(kind: &str, options: Options, backend: Backend) -> Result<Arc<dyn Tunnel>> {
    let tunnel: Arc<dyn Tunnel> = match kind {
        "file" => Arc::new(FileTunnel::new(options, backend)),
        "http" => Arc::new(HttpTunnel::new(options, backend)),
        "tcp" => Arc::new(TcpTunnel::new(options, backend)),
        "udp" => Arc::new(UdpTunnel::new(options, backend)),
        other => return Err(Error::UnknownType(other.to_string())),
    };
    Ok(tunnel)
}

fn closed() -> Error {
    Error::TunnelClosed
}
