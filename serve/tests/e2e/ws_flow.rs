use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use switchboard::planner::{DriverOutcome, PlanDecision};
use switchboard::Plan;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::common::{process_task_body, spawn_server};

async fn next_json(
    ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> serde_json::Value {
    loop {
        let msg = ws.next().await.expect("ws closed").expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("ws frame is json");
        }
    }
}

/// **Scenario**: Interrupt acks report delivery; unknown threads are not delivered.
#[tokio::test]
async fn interrupt_ack_reports_delivery() {
    let server = spawn_server().await;
    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();

    ws.send(Message::Text(
        json!({"type": "interrupt", "payload": {"threadID": "ghost", "reason": "stop"}})
            .to_string(),
    ))
    .await
    .unwrap();
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "interrupt_ack");
    assert_eq!(ack["payload"]["delivered"], false);
}

/// **Scenario**: A human_input pause resumes over the WebSocket and the
/// resume_result carries the completed plan view.
#[tokio::test]
async fn resume_over_websocket() {
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
        .json(&process_task_body("task-1", "t-ws", "file a bug"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["result"]["status"], "interrupted");

    let (mut ws, _) = connect_async(server.ws_url("/ws")).await.unwrap();
    ws.send(Message::Text(
        json!({
            "type": "resume",
            "payload": {"threadID": "t-ws", "userID": "u1", "input": "PROJ"},
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let result = next_json(&mut ws).await;
    assert_eq!(result["type"], "resume_result", "{}", result);
    assert_eq!(result["payload"]["status"], "completed");
    assert_eq!(result["payload"]["plan"]["completed"], json!([0]));
}

/// **Scenario**: A client connected with ?thread= sees the event mirror.
#[tokio::test]
async fn ws_mirrors_thread_events() {
    let server = spawn_server().await;
    server
        .planner
        .push_plan(PlanDecision::Plan(Plan::from_descriptions(["one step"])));

    let (mut ws, _) = connect_async(server.ws_url("/ws?thread=t-mirror"))
        .await
        .unwrap();

    let client = reqwest::Client::new();
    client
        .post(server.url("/a2a"))
        .json(&process_task_body("task-1", "t-mirror", "do the thing"))
        .send()
        .await
        .unwrap();

    let mut kinds = Vec::new();
    for _ in 0..4 {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), next_json(&mut ws))
            .await
            .expect("mirror frame in time");
        assert_eq!(frame["type"], "event");
        kinds.push(frame["kind"].as_str().unwrap().to_string());
    }
    assert!(kinds.contains(&"plan_created".to_string()), "{:?}", kinds);
}
