// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - File Tunnel
// Serves a local directory and publishes it on the relay

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::{closed, Backend, Lifecycle, Tunnel};
use crate::error::{Error, Result};
use crate::forward::{Credentials, ForwardNode, HandlerKind, ListenerKind, ServiceConfig};
use crate::options::Options;
use crate::stats::CounterSnapshot;

pub struct FileTunnel {
    options: Options,
    backend: Backend,
    core: Arc<Lifecycle>,
}

impl FileTunnel {
    pub fn new(options: Options, backend: Backend) -> Self {
        let options = options.normalize(current_dir);
        let core = Lifecycle::new(format!("file-{}", options.id), closed);
        Self {
            options,
            backend,
            core,
        }
    }

    /// Local static file server on an ephemeral loopback port
    fn file_service(&self) -> ServiceConfig {
        ServiceConfig {
            name: format!("file-{}", self.options.id),
            addr: "127.0.0.1:0".to_string(),
            listener: ListenerKind::Tcp,
            handler: HandlerKind::File {
                root: PathBuf::from(&self.options.endpoint),
                auth: Credentials::from_parts(&self.options.username, &self.options.password),
            },
            chain: None,
            seed: CounterSnapshot::default(),
        }
    }

    /// Relay leg targeting the file server at `target`
    fn forward_service(&self, target: String) -> ServiceConfig {
        let name = format!("file-{}-forward", self.options.id);
        ServiceConfig {
            addr: self.options.hostname.clone(),
            listener: ListenerKind::RemoteTcp,
            handler: HandlerKind::Forward {
                node: ForwardNode::new(format!("file-{}", self.options.id), target),
                sniffing: false,
            },
            chain: Some(self.backend.chain(&name, &self.options.id)),
            seed: self.core.stats().seed(),
            name,
        }
    }
}

fn current_dir() -> String {
    std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|_| ".".to_string())
}

#[async_trait]
impl Tunnel for FileTunnel {
    fn kind(&self) -> &'static str {
        "file"
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
        let file_config = self.file_service();
        let builder = self.backend.builder.clone();

        // The relay leg needs the file server's bound address first
        self.core
            .launch(async move {
                let file = builder.build(&file_config).await?;
                let Some(addr) = file.addr() else {
                    let _ = file.close();
                    return Err(Error::Forward("file server has no local address".to_string()));
                };

                match builder.build(&self.forward_service(addr.to_string())).await {
                    Ok(forward) => Ok(vec![file, forward]),
                    Err(e) => {
                        let _ = file.close();
                        Err(e)
                    }
                }
            })
            .await
    }

    fn renew(&self) -> Arc<dyn Tunnel> {
        let fresh = Self::new(self.options.clone(), self.backend.clone());
        fresh.core.inherit(&self.core);
        Arc::new(fresh)
    }
}
