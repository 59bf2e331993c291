//! Full fan-out path: the engine's RPC driver talking JSON-RPC to a mock
//! domain agent served by axum, with the registry and breaker in the loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use switchboard::checkpoint::{EntityStore, MemoryCheckpointStore};
use switchboard::memgraph::{GraphConfig, MemoryKind, RetrievalQuery};
use switchboard::planner::PlanDecision;
use switchboard::rpc::{JsonRpcRequest, JsonRpcResponse, PoolConfig, RetryConfig};
use switchboard::{
    A2aClient, AgentRegistry, BreakerBoard, EngineCtx, EngineLimits, MemoryService, ObserverBus,
    PatternExtractor, Plan, RpcAgentDriver, ScriptedPlanner, Step, TaskStatus, ThreadEngine,
};

use crate::common::CRM_RULES;

/// Scripted replies for the mock agent's `process_task` endpoint, in order.
struct MockAgent {
    replies: Vec<Value>,
    calls: AtomicUsize,
}

async fn mock_card() -> Json<Value> {
    Json(json!({
        "name": "salesforce",
        "version": "1.0",
        "endpoint": "set-by-test",
        "capabilities": ["crm_read"],
        "communication_modes": ["sync"],
    }))
}

async fn mock_a2a(
    State(agent): State<Arc<MockAgent>>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    assert_eq!(request.method, "process_task");
    assert!(request.params["taskID"].is_string());
    assert!(request.params["threadID"].is_string());
    let n = agent.calls.fetch_add(1, Ordering::SeqCst);
    let reply = agent
        .replies
        .get(n)
        .cloned()
        .unwrap_or_else(|| json!({"status": "completed", "output": null}));
    Json(JsonRpcResponse::result(request.id, reply))
}

async fn spawn_mock_agent(replies: Vec<Value>) -> String {
    let agent = Arc::new(MockAgent {
        replies,
        calls: AtomicUsize::new(0),
    });
    let router = Router::new()
        .route("/agent-card", get(mock_card))
        .route("/a2a", post(mock_a2a))
        .with_state(agent);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}

fn rpc_client() -> Arc<A2aClient> {
    Arc::new(
        A2aClient::new(
            PoolConfig::default(),
            RetryConfig::immediate(1),
            Arc::new(BreakerBoard::default()),
        )
        .unwrap(),
    )
}

/// **Scenario**: Registering a live endpoint fetches its card; a later poll of
/// a dead endpoint marks the agent offline but keeps the card.
#[tokio::test]
async fn card_fetch_and_offline_marking() {
    let endpoint = spawn_mock_agent(vec![]).await;
    let client = rpc_client();

    let card = client.get_agent_card(&endpoint).await.unwrap();
    assert_eq!(card.name, "salesforce");
    assert_eq!(card.capabilities, vec!["crm_read"]);

    let registry = Arc::new(AgentRegistry::new());
    registry.register(switchboard::AgentCard {
        endpoint: "http://127.0.0.1:1".into(), // unroutable now
        ..card
    });
    registry.poll_once(&client).await;
    assert!(!registry.is_online("salesforce"));
    assert!(registry.card("salesforce").is_some(), "last card kept");
}

/// **Scenario**: The whole fan-out path — planner hints a capability, the RPC
/// driver routes to the mock CRM agent, the payload flows through extraction
/// into the memory graph, and the workflow completes.
#[tokio::test]
async fn engine_fans_out_to_domain_agent() {
    let endpoint = spawn_mock_agent(vec![json!({
        "status": "completed",
        "message": "Found GenePoint",
        "output": {"id": "001bm00000SA8pSAAT", "Name": "GenePoint"},
    })])
    .await;

    let client = rpc_client();
    let registry = Arc::new(AgentRegistry::new());
    let card = client.get_agent_card(&endpoint).await.unwrap();
    registry.register(switchboard::AgentCard {
        endpoint: endpoint.clone(),
        ..card
    });

    let planner = Arc::new(ScriptedPlanner::new());
    planner.push_plan(PlanDecision::Plan(Plan {
        steps: vec![Step::new("Look up the account 'GenePoint' on the CRM")
            .with_tool_hint("crm_read")],
    }));

    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let memory = Arc::new(
        MemoryService::new(GraphConfig::default())
            .with_entity_store(checkpoints.clone() as Arc<dyn EntityStore>),
    );
    let ctx = Arc::new(EngineCtx {
        planner,
        driver: Arc::new(RpcAgentDriver::new(client, registry.clone())),
        memory: memory.clone(),
        extractor: Arc::new(PatternExtractor::from_yaml_str(CRM_RULES).unwrap()),
        bus: Arc::new(ObserverBus::default()),
        checkpoints,
        registry,
        limits: EngineLimits::default(),
    });

    let engine = ThreadEngine::new("t-rpc", "u1", ctx).unwrap();
    let result = engine
        .run_task("task-rpc", "get the GenePoint account")
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.plan.completed, vec![0]);
    assert!(result.response.unwrap().contains("Found GenePoint"));

    let graph = memory.graph_for("u1").await.unwrap();
    let entities = graph
        .retrieve(
            &RetrievalQuery::new("GenePoint account")
                .with_kinds(vec![MemoryKind::DomainEntity]),
            chrono::Utc::now(),
        )
        .await;
    assert_eq!(entities.len(), 1);
    assert_eq!(
        entities[0].node.entity_id.as_deref(),
        Some("001bm00000SA8pSAAT")
    );
}

/// **Scenario**: An agent-side structured failure becomes a failed step (never
/// a transport error), and an input_required reply pauses the workflow.
#[tokio::test]
async fn agent_rejection_and_question_mapping() {
    let endpoint = spawn_mock_agent(vec![
        json!({"status": "failed", "message": "no such account", "output": null}),
        json!({"status": "input_required", "question": "which region?", "output": null}),
    ])
    .await;

    let client = rpc_client();
    let registry = Arc::new(AgentRegistry::new());
    let card = client.get_agent_card(&endpoint).await.unwrap();
    registry.register(switchboard::AgentCard {
        endpoint: endpoint.clone(),
        ..card
    });

    let planner = Arc::new(ScriptedPlanner::new());
    planner.push_plan(PlanDecision::Plan(Plan {
        steps: vec![
            Step::new("look up a ghost account").with_tool_hint("crm_read"),
            Step::new("look up a regional account").with_tool_hint("crm_read"),
        ],
    }));

    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let ctx = Arc::new(EngineCtx {
        planner,
        driver: Arc::new(RpcAgentDriver::new(client.clone(), registry.clone())),
        memory: Arc::new(MemoryService::new(GraphConfig::default())),
        extractor: Arc::new(PatternExtractor::empty()),
        bus: Arc::new(ObserverBus::default()),
        checkpoints,
        registry,
        limits: EngineLimits::default(),
    });

    let engine = ThreadEngine::new("t-rej", "u1", ctx).unwrap();
    let result = engine.run_task("task-rej", "two lookups").await.unwrap();

    // step 0 failed on the agent rejection, step 1 paused on the question
    assert_eq!(result.status, TaskStatus::Interrupted);
    assert_eq!(result.plan.failed, vec![0]);
    assert_eq!(
        result.interrupt.unwrap().question.as_deref(),
        Some("which region?")
    );

    // the breaker never tripped: the endpoint is still admitting calls
    let breaker = client.breakers().for_endpoint(&endpoint);
    assert!(breaker.admit().is_ok());

    // wait briefly so the mock server's task sees both calls recorded
    tokio::time::sleep(Duration::from_millis(10)).await;
}
