// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Local Forwarding Backend
// Builds the services that run on this host; relay legs go to a pluggable transport

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{debug, info};

use super::{Credentials, ForwardService, HandlerKind, ListenerKind, ServiceBuilder, ServiceConfig};
use crate::error::{Error, Result};
use crate::stats::CounterSnapshot;

/// Builder for services on this host
///
/// Static file servers are built here. Services that listen on, or dial
/// through, the public relay are handed to the relay transport given to
/// [`LocalBuilder::with_relay`]; without one they fail to build.
#[derive(Clone, Default)]
pub struct LocalBuilder {
    relay: Option<Arc<dyn ServiceBuilder>>,
}

impl LocalBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relay(relay: Arc<dyn ServiceBuilder>) -> Self {
        Self { relay: Some(relay) }
    }
}

#[async_trait]
impl ServiceBuilder for LocalBuilder {
    async fn build(&self, config: &ServiceConfig) -> Result<Arc<dyn ForwardService>> {
        if config.chain.is_some() || config.listener.is_remote() {
            return match &self.relay {
                Some(relay) => relay.build(config).await,
                None => Err(Error::Forward(format!(
                    "{}: no relay transport configured",
                    config.name
                ))),
            };
        }

        match (&config.listener, &config.handler) {
            (ListenerKind::Tcp, HandlerKind::File { root, auth }) => {
                let service = FileService::bind(&config.addr, root.clone(), auth.clone()).await?;
                Ok(Arc::new(service))
            }
            _ => Err(Error::Forward(format!(
                "{}: unsupported local service",
                config.name
            ))),
        }
    }
}

/// Static file server on a local TCP listener
pub struct FileService {
    addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    router: Router,
    shutdown: CancellationToken,
}

impl FileService {
    /// Bind `addr` and prepare to serve `root`
    pub async fn bind(addr: &str, root: PathBuf, auth: Option<Credentials>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;

        let mut router = Router::new().fallback_service(ServeDir::new(&root));
        if let Some(creds) = auth {
            let expected = Arc::new(basic_auth_value(&creds));
            router = router.layer(middleware::from_fn_with_state(expected, basic_auth));
        }

        info!("File server for {} bound to {}", root.display(), local);
        Ok(Self {
            addr: local,
            listener: Mutex::new(Some(listener)),
            router,
            shutdown: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl ForwardService for FileService {
    async fn serve(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| Error::Forward(format!("file server {} already served", self.addr)))?;

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        debug!("File server {} stopped", self.addr);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        // Drop the listener if serve never picked it up
        self.listener.lock().take();
        Ok(())
    }

    fn addr(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }

    fn counters(&self) -> Option<CounterSnapshot> {
        None
    }
}

fn basic_auth_value(creds: &Credentials) -> String {
    let raw = format!("{}:{}", creds.username, creds.password);
    format!("Basic {}", STANDARD.encode(raw))
}

async fn basic_auth(State(expected): State<Arc<String>>, request: Request, next: Next) -> Response {
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if provided == Some(expected.as_str()) {
        return next.run(request).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"gost-plus\"")],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::forward::{ChainConfig, ForwardNode};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get(addr: SocketAddr, path: &str, authorization: Option<&str>) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n", path);
        if let Some(value) = authorization {
            request.push_str(&format!("Authorization: {}\r\n", value));
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn file_config(root: PathBuf, auth: Option<Credentials>) -> ServiceConfig {
        ServiceConfig {
            name: "file-test".to_string(),
            addr: "127.0.0.1:0".to_string(),
            listener: ListenerKind::Tcp,
            handler: HandlerKind::File { root, auth },
            chain: None,
            seed: CounterSnapshot::default(),
        }
    }

    #[tokio::test]
    async fn test_serves_files_until_closed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello gost").unwrap();

        let service = LocalBuilder::new()
            .build(&file_config(dir.path().to_path_buf(), None))
            .await
            .unwrap();
        let addr = service.addr().unwrap();
        assert!(service.counters().is_none());

        let serving = service.clone();
        let handle = tokio::spawn(async move { serving.serve().await });

        let response = get(addr, "/hello.txt", None).await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("hello gost"));

        service.close().unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_basic_auth() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("secret.txt"), "classified").unwrap();
        let creds = Credentials::from_parts("admin", "pass");

        let service = LocalBuilder::new()
            .build(&file_config(dir.path().to_path_buf(), creds))
            .await
            .unwrap();
        let addr = service.addr().unwrap();
        let serving = service.clone();
        tokio::spawn(async move { serving.serve().await });

        let denied = get(addr, "/secret.txt", None).await;
        assert!(denied.starts_with("HTTP/1.1 401"));

        let value = format!("Basic {}", STANDARD.encode("admin:pass"));
        let allowed = get(addr, "/secret.txt", Some(&value)).await;
        assert!(allowed.starts_with("HTTP/1.1 200"));
        assert!(allowed.ends_with("classified"));

        service.close().unwrap();
    }

    #[tokio::test]
    async fn test_relay_leg_without_transport_fails() {
        let config = ServiceConfig {
            name: "tcp-test".to_string(),
            addr: String::new(),
            listener: ListenerKind::RemoteTcp,
            handler: HandlerKind::Forward {
                node: ForwardNode::new("target", "localhost:9000"),
                sniffing: false,
            },
            chain: Some(ChainConfig::for_tunnel("tcp-test", "abc", &RelayConfig::default())),
            seed: CounterSnapshot::default(),
        };

        let err = LocalBuilder::new().build(&config).await.err().unwrap();
        assert!(err.to_string().contains("no relay transport"));
    }

    #[tokio::test]
    async fn test_relay_leg_uses_transport() {
        let relay = Arc::new(crate::forward::mock::MockBuilder::default());
        let config = ServiceConfig {
            name: "udp-test".to_string(),
            addr: String::new(),
            listener: ListenerKind::RemoteUdp,
            handler: HandlerKind::Forward {
                node: ForwardNode::new("target", "localhost:5353"),
                sniffing: false,
            },
            chain: Some(ChainConfig::for_tunnel("udp-test", "abc", &RelayConfig::default())),
            seed: CounterSnapshot::default(),
        };

        LocalBuilder::with_relay(relay.clone()).build(&config).await.unwrap();
        assert_eq!(relay.built(), 1);
        assert_eq!(relay.configs.lock()[0], config);
    }
}
