//! `WS /ws` — bidirectional channel.
//!
//! Inbound: `{type:"interrupt", payload:{threadID, reason}}` and
//! `{type:"resume", payload:{threadID, userID?, input, forceReplan?}}`.
//! Outbound: acks/results for inbound commands, plus a mirror of the SSE
//! frames when the client connected with `?thread=<id>`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use switchboard::ResumeCommand;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::a2a::result_json;
use crate::app::AppState;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WsParams {
    thread: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Interrupt { payload: InterruptPayload },
    Resume { payload: ResumePayload },
}

#[derive(Debug, Deserialize)]
struct InterruptPayload {
    #[serde(rename = "threadID")]
    thread_id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResumePayload {
    #[serde(rename = "threadID")]
    thread_id: String,
    #[serde(rename = "userID", default)]
    user_id: Option<String>,
    input: String,
    #[serde(rename = "forceReplan", default)]
    force_replan: bool,
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.thread))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, mirror_thread: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, out_rx) = tokio::sync::mpsc::channel::<String>(64);

    // Event mirror: same frames as the SSE stream, over this socket.
    if let Some(thread) = mirror_thread {
        let rx = state.bus.subscribe(&thread);
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let mut frames = ReceiverStream::new(rx);
            while let Some(frame) = frames.next().await {
                let text = serde_json::to_string(&json!({
                    "type": "event",
                    "kind": frame.kind,
                    "payload": frame,
                }))
                .unwrap_or_else(|_| "{}".to_string());
                if out_tx.send(text).await.is_err() {
                    break;
                }
            }
        });
    }

    let writer = tokio::spawn(async move {
        let mut out_rx = out_rx;
        while let Some(text) = out_rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(next) = stream.next().await {
        let message = match next {
            Ok(m) => m,
            Err(e) => {
                warn!("ws read error (client closed?): {}", e);
                break;
            }
        };
        let text = match &message {
            Message::Text(t) => t.clone(),
            Message::Binary(b) => String::from_utf8_lossy(b).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };
        let reply = handle_inbound(&state, &text).await;
        if out_tx.send(reply).await.is_err() {
            break;
        }
    }
    writer.abort();
}

async fn handle_inbound(state: &Arc<AppState>, text: &str) -> String {
    let inbound: Inbound = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            return json!({"type": "error", "message": format!("parse error: {}", e)}).to_string()
        }
    };

    match inbound {
        Inbound::Interrupt { payload } => {
            let delivered = state.manager.interrupt(&payload.thread_id, payload.reason);
            json!({
                "type": "interrupt_ack",
                "payload": {"threadID": payload.thread_id, "delivered": delivered},
            })
            .to_string()
        }
        Inbound::Resume { payload } => {
            let user_id = payload.user_id.as_deref().unwrap_or("anonymous");
            let cmd = ResumeCommand {
                input: payload.input,
                force_replan: payload.force_replan,
            };
            match state.manager.resume(&payload.thread_id, user_id, cmd).await {
                Ok(result) => json!({
                    "type": "resume_result",
                    "payload": result_json(&result),
                })
                .to_string(),
                Err(e) => {
                    json!({"type": "error", "message": e.to_string()}).to_string()
                }
            }
        }
    }
}
