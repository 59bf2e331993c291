//! Transport surface for Switchboard (axum).
//!
//! Endpoints:
//! - `POST /a2a` — JSON-RPC 2.0 method `process_task`
//! - `GET /a2a/stream` — SSE stream of observer events for one thread
//! - `WS /ws` — interrupts and resume commands inbound, event mirror outbound
//! - `GET /a2a/agent-card` — this orchestrator's own card
//! - `GET /healthz` — liveness
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`], [`supervisor::run`].

mod a2a;
mod app;
mod sse;
pub mod supervisor;
mod ws;

pub use app::AppState;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

/// Serves an already-built state on an existing listener. Tests bind to
/// `127.0.0.1:0` and pass the listener in; the supervisor uses this too.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("switchboard listening on http://{}", addr);

    let app = app::router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            state.shutdown_started().await;
        })
        .await?;
    Ok(())
}

/// Binds `addr` and serves. The caller builds the state (see [`supervisor`]).
pub async fn run_serve(
    addr: &str,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, state).await
}
