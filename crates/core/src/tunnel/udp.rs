// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - UDP Tunnel
// Exposes a local UDP address on the relay

use std::sync::Arc;

use async_trait::async_trait;

use super::tcp::DEFAULT_ENDPOINT;
use super::{closed, Backend, Lifecycle, Tunnel};
use crate::error::Result;
use crate::forward::{ForwardNode, HandlerKind, ListenerKind, ServiceConfig};
use crate::options::Options;

pub struct UdpTunnel {
    options: Options,
    backend: Backend,
    core: Arc<Lifecycle>,
}

impl UdpTunnel {
    pub fn new(options: Options, backend: Backend) -> Self {
        let options = options.normalize(|| DEFAULT_ENDPOINT.to_string());
        let core = Lifecycle::new(format!("udp-{}", options.id), closed);
        Self {
            options,
            backend,
            core,
        }
    }

    fn service_config(&self) -> ServiceConfig {
        let name = format!("udp-{}", self.options.id);
        ServiceConfig {
            addr: self.options.hostname.clone(),
            listener: ListenerKind::RemoteUdp,
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
impl Tunnel for UdpTunnel {
    fn kind(&self) -> &'static str {
        "udp"
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
