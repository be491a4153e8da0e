// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - HTTP Tunnel
// Publishes a local HTTP service under an https address on the relay

use std::sync::Arc;

use async_trait::async_trait;

use super::tcp::DEFAULT_ENDPOINT;
use super::{closed, Backend, Lifecycle, Tunnel};
use crate::error::Result;
use crate::forward::{Credentials, ForwardNode, HandlerKind, ListenerKind, ServiceConfig};
use crate::options::Options;

pub struct HttpTunnel {
    options: Options,
    backend: Backend,
    core: Arc<Lifecycle>,
}

impl HttpTunnel {
    pub fn new(options: Options, backend: Backend) -> Self {
        let options = options.normalize(|| DEFAULT_ENDPOINT.to_string());
        let core = Lifecycle::new(format!("http-{}", options.id), closed);
        Self {
            options,
            backend,
            core,
        }
    }

    fn service_config(&self) -> ServiceConfig {
        let name = format!("http-{}", self.options.id);
        let opts = &self.options;

        let mut node = ForwardNode::new(format!("{}-target", name), &opts.endpoint);
        if !opts.hostname.is_empty() {
            node.host = Some(opts.hostname.clone());
        }
        node.auth = Credentials::from_parts(&opts.username, &opts.password);
        node.tls = opts.enable_tls;

        ServiceConfig {
            addr: String::new(),
            listener: ListenerKind::RemoteTcp,
            handler: HandlerKind::Forward {
                node,
                sniffing: true,
            },
            chain: Some(self.backend.chain(&name, &opts.id)),
            seed: self.core.stats().seed(),
            name,
        }
    }
}

#[async_trait]
impl Tunnel for HttpTunnel {
    fn kind(&self) -> &'static str {
        "http"
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
        format!("https://{}", self.backend.public_host(&self.options))
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
