use crate::common::{process_task_body, spawn_server};

/// **Scenario**: Malformed body, unknown method, and bad params map to the
/// standard JSON-RPC error codes.
#[tokio::test]
async fn json_rpc_error_codes() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    // not JSON at all
    let body: serde_json::Value = client
        .post(server.url("/a2a"))
        .header("content-type", "application/json")
        .body("not json {{{")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32700);

    // unknown method
    let mut request = process_task_body("task-x", "tx", "hi");
    request["method"] = serde_json::json!("do_magic");
    let body: serde_json::Value = client
        .post(server.url("/a2a"))
        .json(&request)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32601);

    // params missing the context
    let request = serde_json::json!({
        "jsonrpc": "2.0", "id": "1", "method": "process_task",
        "params": {"taskID": "t", "instruction": "hi"},
    });
    let body: serde_json::Value = client
        .post(server.url("/a2a"))
        .json(&request)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["id"], "1", "error echoes the request id");
}
