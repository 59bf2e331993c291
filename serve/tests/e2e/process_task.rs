use serde_json::json;
use switchboard::planner::{DriverOutcome, PlanDecision};
use switchboard::Plan;

use crate::common::{process_task_body, spawn_server};

/// **Scenario**: Spec §8 happy path over the wire — one-step plan, CRM payload,
/// completed=[0], response carries the account name and id.
#[tokio::test]
async fn process_task_happy_path() {
    let server = spawn_server().await;
    server
        .planner
        .push_plan(PlanDecision::Plan(Plan::from_descriptions([
            "Look up the account 'GenePoint' on the CRM",
        ])));
    server.driver.push_outcome(DriverOutcome::Completed {
        summary: "Found GenePoint (001bm00000SA8pSAAT)".into(),
        payload: json!({"id": "001bm00000SA8pSAAT", "Name": "GenePoint"}),
    });

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .post(server.url("/a2a"))
        .json(&process_task_body("task-1", "t1", "get the GenePoint account"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(body["error"].is_null(), "unexpected error: {}", body);
    let result = &body["result"];
    assert_eq!(result["status"], "completed");
    let response = result["response"].as_str().unwrap();
    assert!(response.contains("GenePoint"));
    assert!(response.contains("001bm00000SA8pSAAT"));
    assert_eq!(result["plan"]["completed"], json!([0]));
    assert_eq!(result["plan"]["failed"], json!([]));
    assert!(result["plan"]["current"].is_null());
}

/// **Scenario**: Once shutdown has begun, new process_task calls get HTTP 503
/// before reaching the engine; liveness and the drain routes stay up.
#[tokio::test]
async fn closed_surface_returns_503() {
    let server = spawn_server().await;
    server.state.manager.close();

    let client = reqwest::Client::new();
    let resp = client
        .post(server.url("/a2a"))
        .json(&process_task_body("task-x", "tx", "too late"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32603);

    let health = reqwest::get(server.url("/healthz")).await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
}

/// **Scenario**: An interrupted workflow returns status=interrupted with the
/// question, and a follow-up process_task on the same thread resumes it.
#[tokio::test]
async fn interrupted_then_resumed_via_rpc() {
    let server = spawn_server().await;
    server
        .planner
        .push_plan(PlanDecision::Plan(Plan::from_descriptions(["create bug"])));
    server.driver.push_outcome(DriverOutcome::NeedsInput {
        question: "which project?".into(),
    });
    server.driver.push_outcome(DriverOutcome::Completed {
        summary: "created in PROJ".into(),
        payload: json!(null),
    });

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .post(server.url("/a2a"))
        .json(&process_task_body("task-2", "t2", "file a bug"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let result = &body["result"];
    assert_eq!(result["status"], "interrupted");
    assert_eq!(result["interrupt"]["type"], "human_input");
    assert_eq!(result["interrupt"]["question"], "which project?");

    // Same thread, answer as the instruction: the surface resumes the workflow.
    let body: serde_json::Value = client
        .post(server.url("/a2a"))
        .json(&process_task_body("task-2b", "t2", "PROJ"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["result"]["status"], "completed");
    assert_eq!(
        body["result"]["response"].as_str().unwrap(),
        "created in PROJ"
    );
}
