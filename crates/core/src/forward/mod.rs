// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Forwarding Module
// Service descriptions handed to the forwarding backend and the traits it implements

mod counters;
mod local;

pub use counters::Counters;
pub use local::{FileService, LocalBuilder};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RelayConfig;
use crate::error::Result;
use crate::stats::CounterSnapshot;

/// How a service accepts traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerKind {
    /// Local TCP listener
    Tcp,
    /// Local UDP listener with per-peer sessions
    Udp { keepalive: bool, ttl: Duration },
    /// TCP connections accepted on the relay side of the chain
    RemoteTcp,
    /// UDP datagrams accepted on the relay side of the chain
    RemoteUdp,
}

impl ListenerKind {
    /// Whether the listener lives on the relay rather than this host
    pub fn is_remote(&self) -> bool {
        matches!(self, ListenerKind::RemoteTcp | ListenerKind::RemoteUdp)
    }
}

/// Basic auth credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Credentials from option values; `None` when no username is set
    pub fn from_parts(username: &str, password: &str) -> Option<Self> {
        if username.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Forwarding target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardNode {
    pub name: String,
    pub addr: String,
    /// Host header override (HTTP)
    pub host: Option<String>,
    /// Credentials injected towards the target
    pub auth: Option<Credentials>,
    /// Dial the target over TLS
    pub tls: bool,
}

impl ForwardNode {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            host: None,
            auth: None,
            tls: false,
        }
    }
}

/// What a service does with accepted traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerKind {
    /// Serve static files from `root`
    File {
        root: PathBuf,
        auth: Option<Credentials>,
    },
    /// Relay bytes to `node`. `sniffing` inspects HTTP requests so host
    /// rewriting and auth injection can apply.
    Forward { node: ForwardNode, sniffing: bool },
}

/// Route through the public relay, selecting the remote tunnel by id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub name: String,
    /// Relay address
    pub addr: String,
    /// TLS server name presented to the relay
    pub server_name: String,
    /// Tunnel the relay binds or connects this leg to
    pub tunnel_id: String,
    /// Transport towards the relay; always websocket over TLS
    pub dialer: String,
}

impl ChainConfig {
    pub fn for_tunnel(name: &str, tunnel_id: &str, relay: &RelayConfig) -> Self {
        Self {
            name: format!("chain-{}", name),
            addr: relay.server_addr.clone(),
            server_name: relay.server_name.clone(),
            tunnel_id: tunnel_id.to_string(),
            dialer: "wss".to_string(),
        }
    }
}

/// Full description of one forwarding service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    /// Listen address, or the bind address requested from the relay
    pub addr: String,
    pub listener: ListenerKind,
    pub handler: HandlerKind,
    pub chain: Option<ChainConfig>,
    /// Cumulative counters to start from
    pub seed: CounterSnapshot,
}

/// A built and bound forwarding service
#[async_trait]
pub trait ForwardService: Send + Sync {
    /// Serve until closed or a fatal I/O error
    async fn serve(&self) -> Result<()>;

    /// Stop accepting and release the listener
    fn close(&self) -> Result<()>;

    /// Bound local address, if the listener is local
    fn addr(&self) -> Option<SocketAddr>;

    /// Live counters, if this service keeps any
    fn counters(&self) -> Option<CounterSnapshot>;
}

/// Turns a [`ServiceConfig`] into a bound [`ForwardService`]
#[async_trait]
pub trait ServiceBuilder: Send + Sync {
    async fn build(&self, config: &ServiceConfig) -> Result<Arc<dyn ForwardService>>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::Error;

    /// Service that serves until closed and counts close calls
    pub struct MockService {
        config: ServiceConfig,
        stop: CancellationToken,
        closes: Arc<AtomicUsize>,
        counters: Counters,
    }

    impl MockService {
        pub fn counters_mut(&self) -> &Counters {
            &self.counters
        }

        pub fn name(&self) -> &str {
            &self.config.name
        }

        pub fn is_closed(&self) -> bool {
            self.stop.is_cancelled()
        }
    }

    #[async_trait]
    impl ForwardService for MockService {
        async fn serve(&self) -> Result<()> {
            self.stop.cancelled().await;
            Ok(())
        }

        fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.stop.cancel();
            Ok(())
        }

        fn addr(&self) -> Option<SocketAddr> {
            if self.config.listener.is_remote() {
                return None;
            }
            "127.0.0.1:18080".parse().ok()
        }

        fn counters(&self) -> Option<CounterSnapshot> {
            Some(self.counters.snapshot())
        }
    }

    /// Builder recording every config and every service it built
    #[derive(Default)]
    pub struct MockBuilder {
        pub configs: Mutex<Vec<ServiceConfig>>,
        pub services: Mutex<Vec<Arc<MockService>>>,
        pub closes: Arc<AtomicUsize>,
        /// Fail builds whose service name contains this text
        pub fail_on: Mutex<Option<String>>,
    }

    impl MockBuilder {
        pub fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        pub fn built(&self) -> usize {
            self.services.lock().len()
        }

        pub fn last_service(&self) -> Option<Arc<MockService>> {
            self.services.lock().last().cloned()
        }
    }

    #[async_trait]
    impl ServiceBuilder for MockBuilder {
        async fn build(&self, config: &ServiceConfig) -> Result<Arc<dyn ForwardService>> {
            self.configs.lock().push(config.clone());
            if let Some(pattern) = self.fail_on.lock().as_deref() {
                if config.name.contains(pattern) {
                    return Err(Error::Forward(format!("bind {}: refused", config.addr)));
                }
            }
            let service = Arc::new(MockService {
                config: config.clone(),
                stop: CancellationToken::new(),
                closes: self.closes.clone(),
                counters: Counters::seeded(config.seed),
            });
            self.services.lock().push(service.clone());
            Ok(service)
        }
    }
}
