use switchboard::{AgentCard, CommunicationMode};

use crate::common::spawn_server;

/// **Scenario**: The orchestrator's own card advertises `orchestrate` plus the
/// union of registered agent capabilities.
#[tokio::test]
async fn agent_card_advertises_capabilities() {
    let server = spawn_server().await;
    server.state.registry.register(AgentCard {
        name: "salesforce".into(),
        version: "1.0".into(),
        endpoint: "http://127.0.0.1:1".into(),
        capabilities: vec!["crm_read".into(), "crm_write".into()],
        communication_modes: vec![CommunicationMode::Sync],
    });

    let card: AgentCard = reqwest::get(server.url("/a2a/agent-card"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(card.name, "switchboard");
    assert!(card.capabilities.iter().any(|c| c == "orchestrate"));
    assert!(card.capabilities.iter().any(|c| c == "crm_read"));
    assert!(card.supports_streaming());
}
