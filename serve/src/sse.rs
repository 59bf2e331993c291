//! `GET /a2a/stream` — SSE stream of observer events for one thread.
//!
//! The per-thread replay ring plays back first, so late subscribers bootstrap
//! before live frames. A fresh subscription also gets one memory graph
//! snapshot when the thread's user is known.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use wire_event::ObserverEvent;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct StreamParams {
    thread: String,
}

pub(crate) async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Snapshot before subscribing so it precedes live frames for this client.
    if let Some(engine) = state.manager.get(&params.thread) {
        if let Ok(graph) = state
            .manager
            .ctx()
            .memory
            .graph_for(engine.user_id())
            .await
        {
            let snapshot = graph.snapshot().await;
            state.bus.emit(
                &params.thread,
                None,
                &ObserverEvent::MemoryGraphSnapshot { snapshot },
            );
        }
    }

    let rx = state.bus.subscribe(&params.thread);
    let stream = ReceiverStream::new(rx).map(|frame| {
        Ok(Event::default()
            .event(frame.kind.clone())
            .data(serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string())))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
