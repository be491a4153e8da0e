// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - REST API Module
// HTTP endpoints for managing tunnels and entrypoints

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use gost_plus_core::{App, Error, Options, Registry, ServiceStats, State as RunState, Tunnel};

/// Shared application state
pub struct AppState {
    pub app: Arc<App>,
    pub events_tx: broadcast::Sender<OutgoingEvent>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    fn registry(&self, section: &str) -> Option<&Registry> {
        match section {
            "tunnels" => Some(&self.app.tunnels),
            "entrypoints" => Some(&self.app.entrypoints),
            _ => None,
        }
    }
}

/// API error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// API success response
#[derive(Serialize)]
struct SuccessResponse {
    message: String,
}

/// One tunnel or entrypoint as shown to clients
#[derive(Serialize)]
struct EntryView {
    id: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    endpoint: String,
    entrypoint: String,
    state: &'static str,
    favorite: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    stats: ServiceStats,
}

impl EntryView {
    fn of(entry: &dyn Tunnel) -> Self {
        Self {
            id: entry.id().to_string(),
            name: entry.name().to_string(),
            kind: entry.kind().to_string(),
            endpoint: entry.endpoint(),
            entrypoint: entry.entrypoint(),
            state: match entry.state() {
                RunState::Constructed => "stopped",
                RunState::Running => "running",
                RunState::Closed => "closed",
            },
            favorite: entry.is_favorite(),
            error: entry.err(),
            created_at: entry.options().created_at,
            stats: entry.stats(),
        }
    }
}

#[derive(Serialize)]
struct EntriesListResponse {
    entries: Vec<EntryView>,
}

/// Create or edit request
#[derive(Debug, Deserialize)]
pub struct EntryRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub enable_tls: bool,
    #[serde(default)]
    pub keepalive: bool,
    /// Seconds
    #[serde(default)]
    pub ttl: u64,
}

impl EntryRequest {
    fn options(&self, id: Option<&str>, created_at: Option<DateTime<Utc>>) -> Options {
        Options {
            id: id.unwrap_or_default().to_string(),
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            enable_tls: self.enable_tls,
            keepalive: self.keepalive,
            ttl: Duration::from_secs(self.ttl),
            created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FavoriteRequest {
    pub favorite: bool,
}

// Event type
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingEvent {
    StatsUpdated { timestamp: DateTime<Utc> },
    TaskFailed { task: String, error: String },
    Heartbeat { timestamp: DateTime<Utc> },
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/events", get(event_stream))
        .route("/api/:section", get(list_entries).post(create_entry))
        .route(
            "/api/:section/:id",
            get(get_entry).put(update_entry).delete(delete_entry),
        )
        .route("/api/:section/:id/toggle", post(toggle_entry))
        .route("/api/:section/:id/favorite", post(set_favorite))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

fn unknown_section(section: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("Unknown section: {}", section))
}

fn not_found(id: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("{} not found", id))
}

/// Persist after a mutation; failures are logged by the registry
async fn persist(registry: &Registry) {
    let _ = registry.save_to_config().await;
}

/// Health check endpoint
async fn health() -> &'static str {
    "OK"
}

/// List all entries of a section
async fn list_entries(
    State(state): State<Arc<AppState>>,
    Path(section): Path<String>,
) -> Response {
    let Some(registry) = state.registry(&section) else {
        return unknown_section(&section);
    };

    let entries = registry
        .entries()
        .await
        .iter()
        .map(|entry| EntryView::of(entry.as_ref()))
        .collect();
    Json(EntriesListResponse { entries }).into_response()
}

/// Get one entry
async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path((section, id)): Path<(String, String)>,
) -> Response {
    let Some(registry) = state.registry(&section) else {
        return unknown_section(&section);
    };

    match registry.get_by_id(&id).await {
        Some(entry) => Json(EntryView::of(entry.as_ref())).into_response(),
        None => not_found(&id),
    }
}

/// Create and start an entry
async fn create_entry(
    State(state): State<Arc<AppState>>,
    Path(section): Path<String>,
    Json(request): Json<EntryRequest>,
) -> Response {
    let Some(registry) = state.registry(&section) else {
        return unknown_section(&section);
    };
    info!("API: Create {} request of type {}", section, request.kind);

    let entry = match registry.create(&request.kind, request.options(None, None)) {
        Ok(entry) => entry,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    registry.add(entry.clone()).await;
    if let Err(e) = entry.run().await {
        warn!("Failed to start {} {}: {}", entry.kind(), entry.id(), e);
        let _ = entry.close();
    }
    persist(registry).await;

    (StatusCode::CREATED, Json(EntryView::of(entry.as_ref()))).into_response()
}

/// Replace an entry with edited options and restart it
async fn update_entry(
    State(state): State<Arc<AppState>>,
    Path((section, id)): Path<(String, String)>,
    Json(request): Json<EntryRequest>,
) -> Response {
    let Some(registry) = state.registry(&section) else {
        return unknown_section(&section);
    };
    info!("API: Update request for {}", id);

    let Some(current) = registry.get_by_id(&id).await else {
        return not_found(&id);
    };
    let options = request.options(Some(current.id()), current.options().created_at);
    let entry = match registry.create(&request.kind, options) {
        Ok(entry) => entry,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let result = registry.update(entry.clone()).await;
    persist(registry).await;
    match result {
        Ok(()) => Json(EntryView::of(entry.as_ref())).into_response(),
        Err(Error::NotFound(_)) => not_found(&id),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Close and remove an entry
async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path((section, id)): Path<(String, String)>,
) -> Response {
    let Some(registry) = state.registry(&section) else {
        return unknown_section(&section);
    };
    info!("API: Delete request for {}", id);

    if registry.get_by_id(&id).await.is_none() {
        return not_found(&id);
    }
    registry.delete(&id).await;
    persist(registry).await;

    Json(SuccessResponse {
        message: format!("{} deleted", id),
    })
    .into_response()
}

/// Start a closed entry or stop a running one
async fn toggle_entry(
    State(state): State<Arc<AppState>>,
    Path((section, id)): Path<(String, String)>,
) -> Response {
    let Some(registry) = state.registry(&section) else {
        return unknown_section(&section);
    };
    info!("API: Toggle request for {}", id);

    let result = registry.toggle(&id).await;
    persist(registry).await;
    match result {
        Ok(entry) => Json(EntryView::of(entry.as_ref())).into_response(),
        Err(Error::NotFound(_)) => not_found(&id),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Mark or unmark an entry as favorite
async fn set_favorite(
    State(state): State<Arc<AppState>>,
    Path((section, id)): Path<(String, String)>,
    Json(request): Json<FavoriteRequest>,
) -> Response {
    let Some(registry) = state.registry(&section) else {
        return unknown_section(&section);
    };

    let Some(entry) = registry.get_by_id(&id).await else {
        return not_found(&id);
    };
    entry.set_favorite(request.favorite);
    persist(registry).await;

    Json(EntryView::of(entry.as_ref())).into_response()
}

/// GET /api/events  → SSE stream of task events
pub async fn event_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events_tx.subscribe();
    let mut shutdown_rx = state.shutdown_tx.subscribe();

    let task_events = BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().data(json))),
                Err(e) => {
                    tracing::error!("Failed to serialize OutgoingEvent: {e}");
                    None
                }
            },
            Err(lagged) => {
                // Slow client; later events still arrive
                tracing::debug!("Event stream lagged: {:?}, continuing", lagged);
                None
            }
        }
    });

    let merged = stream::select(task_events, heartbeat_stream());

    let shutdown_aware = merged.take_until(async move {
        let _ = shutdown_rx.recv().await;
    });

    Sse::new(shutdown_aware)
}

fn heartbeat_stream(
) -> impl futures::Stream<Item = Result<Event, Infallible>> + Send + Sync + 'static {
    tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(heartbeat_interval()))
        .map(|_| Ok(Event::default().data(heartbeat_payload())))
}

fn heartbeat_payload() -> String {
    match serde_json::to_string(&OutgoingEvent::Heartbeat { timestamp: Utc::now() }) {
        Ok(j) => j,
        Err(e) => {
            tracing::error!("Failed to serialize heartbeat: {e}");
            "{}".to_string()
        }
    }
}

#[cfg(not(test))]
fn heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
fn heartbeat_interval() -> Duration {
    Duration::from_millis(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use gost_plus_core::forward::{ForwardService, ServiceBuilder, ServiceConfig};
    use gost_plus_core::CounterSnapshot;
    use serde_json::Value;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    /// Accepts every service and serves until closed
    struct Loopback;

    struct Idle(CancellationToken);

    #[async_trait]
    impl ForwardService for Idle {
        async fn serve(&self) -> gost_plus_core::Result<()> {
            self.0.cancelled().await;
            Ok(())
        }
        fn close(&self) -> gost_plus_core::Result<()> {
            self.0.cancel();
            Ok(())
        }
        fn addr(&self) -> Option<std::net::SocketAddr> {
            "127.0.0.1:1".parse().ok()
        }
        fn counters(&self) -> Option<CounterSnapshot> {
            Some(CounterSnapshot::default())
        }
    }

    #[async_trait]
    impl ServiceBuilder for Loopback {
        async fn build(
            &self,
            _config: &ServiceConfig,
        ) -> gost_plus_core::Result<Arc<dyn ForwardService>> {
            Ok(Arc::new(Idle(CancellationToken::new())))
        }
    }

    fn test_state(dir: &TempDir) -> Arc<AppState> {
        let app = App::new(dir.path(), Arc::new(Loopback)).unwrap();
        let (events_tx, _) = broadcast::channel(16);
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(AppState {
            app: Arc::new(app),
            events_tx,
            shutdown_tx,
        })
    }

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_entry_lifecycle_over_http() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let router = create_router(state.clone());

        let (status, created) = call(
            &router,
            Method::POST,
            "/api/tunnels",
            Some(serde_json::json!({"type": "tcp", "endpoint": "localhost:9000"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["state"], "running");
        assert_eq!(created["endpoint"], "localhost:9000");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, list) = call(&router, Method::GET, "/api/tunnels", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["entries"].as_array().unwrap().len(), 1);

        let (_, fav) = call(
            &router,
            Method::POST,
            &format!("/api/tunnels/{}/favorite", id),
            Some(serde_json::json!({"favorite": true})),
        )
        .await;
        assert_eq!(fav["favorite"], true);

        let toggle = format!("/api/tunnels/{}/toggle", id);
        let (_, stopped) = call(&router, Method::POST, &toggle, None).await;
        assert_eq!(stopped["state"], "closed");
        let (_, started) = call(&router, Method::POST, &toggle, None).await;
        assert_eq!(started["state"], "running");
        assert_eq!(started["favorite"], true);
        assert_eq!(started["entrypoint"], created["entrypoint"]);

        let saved = state.app.config.get();
        assert_eq!(saved.tunnels.len(), 1);
        assert!(saved.tunnels[0].favorite);

        let entry = format!("/api/tunnels/{}", id);
        let (status, _) = call(&router, Method::DELETE, &entry, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&router, Method::GET, &entry, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(state.app.config.get().tunnels.is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_id() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let router = create_router(state.clone());

        let (_, created) = call(
            &router,
            Method::POST,
            "/api/entrypoints",
            Some(serde_json::json!({"type": "tcp"})),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();

        let (status, updated) = call(
            &router,
            Method::PUT,
            &format!("/api/entrypoints/{}", id),
            Some(serde_json::json!({"type": "udp", "endpoint": "127.0.0.1:5353", "ttl": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["id"], id.as_str());
        assert_eq!(updated["type"], "udp");
        assert_eq!(updated["entrypoint"], "127.0.0.1:5353");
        assert_eq!(state.app.config.get().entrypoints[0].ttl, 10);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let dir = TempDir::new().unwrap();
        let router = create_router(test_state(&dir));

        let (status, _) = call(&router, Method::GET, "/api/widgets", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/entrypoints",
            Some(serde_json::json!({"type": "file"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("file"));

        let (status, _) = call(&router, Method::POST, "/api/tunnels/nope/toggle", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&router, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn heartbeat_stream_emits() {
        let mut stream = heartbeat_stream();
        let _evt = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("heartbeat timed out")
            .expect("stream ended");

        let json = heartbeat_payload();
        assert!(json.contains("heartbeat"), "heartbeat payload missing marker");
    }

    #[test]
    fn test_outgoing_event_shape() {
        let json = serde_json::to_string(&OutgoingEvent::TaskFailed {
            task: "service.stats.update".to_string(),
            error: "disk full".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"task_failed\""));
        assert!(json.contains("disk full"));
    }
}
