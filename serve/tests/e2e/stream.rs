use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use switchboard::planner::{DriverOutcome, PlanDecision};
use switchboard::Plan;

use crate::common::{process_task_body, spawn_server};

/// **Scenario**: The SSE stream replays the thread's recent events to a late
/// subscriber: plan_created, task frames, and memory node events with content.
#[tokio::test]
async fn sse_stream_replays_thread_events() {
    let server = spawn_server().await;
    server
        .planner
        .push_plan(PlanDecision::Plan(Plan::from_descriptions([
            "Look up the account 'GenePoint' on the CRM",
        ])));
    server.driver.push_outcome(DriverOutcome::Completed {
        summary: "Found GenePoint".into(),
        payload: json!({"id": "001bm00000SA8pSAAT", "Name": "GenePoint"}),
    });

    let client = reqwest::Client::new();
    client
        .post(server.url("/a2a"))
        .json(&process_task_body("task-1", "t-sse", "get the GenePoint account"))
        .send()
        .await
        .unwrap();

    let resp = client
        .get(server.url("/a2a/stream?thread=t-sse"))
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    let mut body = resp.bytes_stream();
    let mut buffer = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(500), body.next()).await {
            Ok(Some(Ok(chunk))) => {
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                if buffer.contains("task_completed") {
                    break;
                }
            }
            _ => break,
        }
    }

    assert!(buffer.contains("event: plan_created"), "{}", buffer);
    assert!(buffer.contains("event: task_started"), "{}", buffer);
    assert!(buffer.contains("event: task_completed"), "{}", buffer);
    assert!(
        buffer.contains("event: memory_node_added"),
        "{}",
        buffer
    );
    // memory node frames carry the full content
    assert!(buffer.contains("GenePoint"), "{}", buffer);
    assert!(buffer.contains("\"threadID\":\"t-sse\""), "{}", buffer);
}
