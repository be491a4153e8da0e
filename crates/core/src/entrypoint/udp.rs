// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - UDP EntryPoint
// Local UDP listener forwarding into a remote tunnel

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{closed, DEFAULT_ENDPOINT};
use crate::error::Result;
use crate::forward::{ForwardNode, HandlerKind, ListenerKind, ServiceConfig};
use crate::options::Options;
use crate::tunnel::{Backend, Lifecycle, Tunnel};

/// Idle timeout for UDP sessions when none is configured
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

pub struct UdpEntryPoint {
    options: Options,
    backend: Backend,
    core: Arc<Lifecycle>,
}

impl UdpEntryPoint {
    pub fn new(options: Options, backend: Backend) -> Self {
        let options = options.normalize(|| DEFAULT_ENDPOINT.to_string());
        let core = Lifecycle::new(format!("entrypoint-udp-{}", options.id), closed);
        Self {
            options,
            backend,
            core,
        }
    }

    fn service_config(&self) -> ServiceConfig {
        let name = format!("entrypoint-udp-{}", self.options.id);
        let ttl = if self.options.ttl.is_zero() {
            DEFAULT_TTL
        } else {
            self.options.ttl
        };

        ServiceConfig {
            addr: self.options.endpoint.clone(),
            listener: ListenerKind::Udp {
                keepalive: self.options.keepalive,
                ttl,
            },
            handler: HandlerKind::Forward {
                node: ForwardNode::new(
                    format!("{}-target", name),
                    self.backend.public_host(&self.options),
                ),
                sniffing: false,
            },
            chain: Some(self.backend.chain(&name, &self.options.id)),
            seed: self.core.stats().seed(),
            name,
        }
    }
}

#[async_trait]
impl Tunnel for UdpEntryPoint {
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
        self.backend.public_host(&self.options)
    }

    fn entrypoint(&self) -> String {
        self.options.endpoint.clone()
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
