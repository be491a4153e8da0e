// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - TCP Tunnel
// Exposes a local TCP address on the relay

use std::sync::Arc;

use async_trait::async_trait;

use super::{closed, Backend, Lifecycle, Tunnel};
use crate::error::Result;
use crate::forward::{ForwardNode, HandlerKind, ListenerKind, ServiceConfig};
use crate::options::Options;

pub(crate) const DEFAULT_ENDPOINT: &str = "localhost:8080";

pub struct TcpTunnel {
    options: Options,
    backend: Backend,
    core: Arc<Lifecycle>,
}

impl TcpTunnel {
    pub fn new(options: Options, backend: Backend) -> Self {
        let options = options.normalize(|| DEFAULT_ENDPOINT.to_string());
        let core = Lifecycle::new(format!("tcp-{}", options.id), closed);
        Self {
            options,
            backend,
            core,
        }
    }

    fn service_config(&self) -> ServiceConfig {
        let name = format!("tcp-{}", self.options.id);
        ServiceConfig {
            addr: self.options.hostname.clone(),
            listener: ListenerKind::RemoteTcp,
            handler: HandlerKind::Forward {
                node: ForwardNode::new(format!("{}-target", name), &self.options.endpoint),
                sniffing: false,
            },
            chain: Some(self.backend.chain(&name, &self.options.id)),
            seed: self.core.stats().seed(),
            name,
        }
    }
}

#[async_trait]
impl Tunnel for TcpTunnel {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.core
    }

    fn endpoint(&self) -> String {
        self.options.endpoint.clone()
    }

    fn entrypoint(&self) -> String {
        self.backend.public_host(&self.options)
    }

    async fn run(&self) -> Result<()> {
        let config = self.service_config();
        let builder = self.backend.builder.clone();
        self.core
            .launch(async move { Ok(vec![builder.build(&config).await?]) })
            .await
    }

    fn renew(&self) -> Arc<dyn Tunnel> {
        let fresh = Self::new(self.options.clone(), self.backend.clone());
        fresh.core.inherit(&self.core);
        Arc::new(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ServiceStats;
    use crate::tunnel::testing;

    #[test]
    fn test_defaults() {
        let (_, backend) = testing::backend();
        let tunnel = TcpTunnel::new(Options::default(), backend);
        assert_eq!(tunnel.endpoint(), "localhost:8080");
        assert_eq!(tunnel.name(), tunnel.options().token());
    }

    #[tokio::test]
    async fn test_run_builds_relay_leg() {
        let (builder, backend) = testing::backend();
        let tunnel = TcpTunnel::new(
            Options {
                id: "tcp-id".to_string(),
                endpoint: "localhost:9000".to_string(),
                hostname: "0.0.0.0:2222".to_string(),
                ..Default::default()
            },
            backend,
        );
        tunnel.set_stats(ServiceStats {
            total_conns: 12,
            input_bytes: 300,
            ..Default::default()
        });
        tunnel.run().await.unwrap();

        let configs = builder.configs.lock().clone();
        assert_eq!(configs.len(), 1);
        let config = &configs[0];
        assert_eq!(config.listener, ListenerKind::RemoteTcp);
        assert_eq!(config.addr, "0.0.0.0:2222");
        assert_eq!(config.seed.total_conns, 12);
        assert_eq!(config.seed.input_bytes, 300);
        match &config.handler {
            HandlerKind::Forward { node, .. } => assert_eq!(node.addr, "localhost:9000"),
            other => panic!("unexpected handler {:?}", other),
        }
        let chain = config.chain.as_ref().unwrap();
        assert_eq!(chain.tunnel_id, "tcp-id");
        assert_eq!(chain.addr, "tunnel.gost.plus:443");
        assert_eq!(chain.server_name, "tunnel.gost.plus");

        tunnel.close().unwrap();
    }

    #[tokio::test]
    async fn test_counters_come_from_service() {
        let (builder, backend) = testing::backend();
        let tunnel = TcpTunnel::new(Options::default(), backend);
        assert!(tunnel.counters().is_none());

        tunnel.run().await.unwrap();
        let service = builder.last_service().unwrap();
        service.counters_mut().conn_opened();
        service.counters_mut().add_output(64);

        let counters = tunnel.counters().unwrap();
        assert_eq!(counters.current_conns, 1);
        assert_eq!(counters.output_bytes, 64);

        tunnel.close().unwrap();
        assert!(tunnel.counters().is_none());
    }

    #[tokio::test]
    async fn test_renew_carries_favorite_and_stats() {
        let (_, backend) = testing::backend();
        let tunnel = TcpTunnel::new(Options::default(), backend);
        tunnel.set_favorite(true);
        tunnel.set_stats(ServiceStats {
            output_bytes: 99,
            ..Default::default()
        });
        tunnel.close().unwrap();

        let fresh = tunnel.renew();
        assert!(!fresh.is_closed());
        assert!(fresh.is_favorite());
        assert_eq!(fresh.stats().output_bytes, 99);
        assert_eq!(fresh.options(), tunnel.options());
    }
}
