//! Axum app: shared state and router.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use switchboard::rpc::{code, JsonRpcResponse};
use switchboard::{AgentRegistry, ObserverBus, ThreadManager};
use tokio::sync::Notify;

use crate::{a2a, sse, ws};

/// Everything the handlers need. One instance per process.
pub struct AppState {
    pub manager: Arc<ThreadManager>,
    pub bus: Arc<ObserverBus>,
    pub registry: Arc<AgentRegistry>,
    /// Fired when shutdown begins; axum drains on it.
    shutdown: Notify,
}

impl AppState {
    pub fn new(
        manager: Arc<ThreadManager>,
        bus: Arc<ObserverBus>,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            manager,
            bus,
            registry,
            shutdown: Notify::new(),
        }
    }

    /// Begins shutdown: the manager refuses new tasks and axum stops accepting.
    pub fn begin_shutdown(&self) {
        self.manager.close();
        self.shutdown.notify_waiters();
    }

    pub(crate) async fn shutdown_started(&self) {
        self.shutdown.notified().await;
    }
}

/// Once shutdown has begun, new `process_task` calls get an HTTP 503 before
/// reaching the engine. SSE/WS subscribers keep draining through the other
/// routes.
async fn refuse_when_closed(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.manager.is_closed() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(JsonRpcResponse::error(
                None,
                code::INTERNAL_ERROR,
                "orchestrator shutting down",
            )),
        )
            .into_response();
    }
    next.run(request).await
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/a2a",
            post(a2a::process_task_handler).layer(middleware::from_fn_with_state(
                state.clone(),
                refuse_when_closed,
            )),
        )
        .route("/a2a/agent-card", get(a2a::agent_card_handler))
        .route("/a2a/stream", get(sse::stream_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "ok"}))
}
