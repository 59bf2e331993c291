//! `POST /a2a` (JSON-RPC `process_task`) and `GET /a2a/agent-card`.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use switchboard::rpc::{code, JsonRpcRequest, JsonRpcResponse};
use switchboard::{
    AgentCard, EngineError, PendingInterrupt, ResumeCommand, TaskResult, ThreadStatus,
};
use tracing::warn;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
struct TaskContext {
    #[serde(rename = "threadID")]
    thread_id: String,
    #[serde(rename = "userID")]
    user_id: String,
    #[allow(dead_code)]
    #[serde(default)]
    source: Option<String>,
    #[allow(dead_code)]
    #[serde(rename = "sessionID", default)]
    session_id: Option<String>,
    #[allow(dead_code)]
    #[serde(rename = "stateSnapshot", default)]
    state_snapshot: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ProcessTaskParams {
    #[serde(rename = "taskID")]
    task_id: String,
    instruction: String,
    context: TaskContext,
}

fn interrupt_json(interrupt: &PendingInterrupt) -> Value {
    let mut out = json!({
        "type": serde_json::to_value(interrupt.kind).unwrap_or(Value::Null),
    });
    if let Some(reason) = &interrupt.reason {
        out["reason"] = json!(reason);
    }
    if let Some(question) = &interrupt.question {
        out["question"] = json!(question);
    }
    out
}

pub(crate) fn result_json(result: &TaskResult) -> Value {
    let mut out = json!({
        "status": serde_json::to_value(result.status).unwrap_or(Value::Null),
        "plan": serde_json::to_value(&result.plan).unwrap_or(Value::Null),
    });
    if let Some(response) = &result.response {
        out["response"] = json!(response);
    }
    if let Some(interrupt) = &result.interrupt {
        out["interrupt"] = interrupt_json(interrupt);
    }
    out
}

fn error_code(e: &EngineError) -> i64 {
    match e {
        EngineError::InvalidState(_) | EngineError::PlanTooLarge { .. } => code::INVALID_REQUEST,
        _ => code::INTERNAL_ERROR,
    }
}

pub(crate) async fn process_task_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<JsonRpcRequest>, axum::extract::rejection::JsonRejection>,
) -> Json<JsonRpcResponse> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                None,
                code::PARSE_ERROR,
                format!("parse error: {}", e),
            ))
        }
    };
    if request.method != "process_task" {
        return Json(JsonRpcResponse::error(
            Some(request.id),
            code::METHOD_NOT_FOUND,
            format!("unknown method: {}", request.method),
        ));
    }
    let params: ProcessTaskParams = match serde_json::from_value(request.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                Some(request.id),
                code::INVALID_REQUEST,
                format!("invalid params: {}", e),
            ))
        }
    };

    let engine = match state
        .manager
        .engine_for(Some(&params.context.thread_id), &params.context.user_id)
    {
        Ok(engine) => engine,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                Some(request.id),
                error_code(&e),
                e.to_string(),
            ))
        }
    };

    // An interrupted thread treats the next instruction as the resume answer;
    // everything else starts a fresh task.
    let outcome = if engine.status() == ThreadStatus::Interrupted {
        engine
            .resume(ResumeCommand {
                input: params.instruction,
                force_replan: false,
            })
            .await
    } else {
        engine.run_task(params.task_id, params.instruction).await
    };

    match outcome {
        Ok(result) => Json(JsonRpcResponse::result(request.id, result_json(&result))),
        Err(e) => {
            warn!(thread = %params.context.thread_id, error = %e, "process_task failed");
            Json(JsonRpcResponse::error(
                Some(request.id),
                error_code(&e),
                e.to_string(),
            ))
        }
    }
}

/// Advertises this orchestrator to callers that speak the same protocol:
/// the union of registered capabilities plus `orchestrate`.
pub(crate) async fn agent_card_handler(State(state): State<Arc<AppState>>) -> Json<AgentCard> {
    let mut capabilities: Vec<String> = state
        .registry
        .capability_catalog()
        .into_keys()
        .collect();
    capabilities.push("orchestrate".to_string());
    capabilities.sort();
    capabilities.dedup();

    Json(AgentCard {
        name: "switchboard".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoint: "/a2a".to_string(),
        capabilities,
        communication_modes: vec![
            switchboard::CommunicationMode::Sync,
            switchboard::CommunicationMode::Streaming,
        ],
    })
}
