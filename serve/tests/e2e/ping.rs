use crate::common::spawn_server;

/// **Scenario**: /healthz answers ok on a fresh server.
#[tokio::test]
async fn healthz_answers_ok() {
    let server = spawn_server().await;
    let body: serde_json::Value = reqwest::get(server.url("/healthz"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}
