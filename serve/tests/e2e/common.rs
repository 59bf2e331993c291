//! Shared fixture: spawns a server with scripted planner/driver doubles.

use std::sync::Arc;
use std::time::Duration;

use serve::AppState;
use switchboard::checkpoint::{EntityStore, MemoryCheckpointStore};
use switchboard::memgraph::GraphConfig;
use switchboard::{
    AgentRegistry, EngineCtx, EngineLimits, MemoryService, ObserverBus, PatternExtractor,
    ScriptedDriver, ScriptedPlanner, ThreadManager,
};

pub const CRM_RULES: &str = r#"
- pattern: "\\b(001[a-zA-Z0-9]{12,15})\\b"
  entity_type: account
  entity_system: sf
  tags: [crm]
"#;

pub struct TestServer {
    pub addr: std::net::SocketAddr,
    pub state: Arc<AppState>,
    pub planner: Arc<ScriptedPlanner>,
    pub driver: Arc<ScriptedDriver>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

pub async fn spawn_server() -> TestServer {
    let planner = Arc::new(ScriptedPlanner::new());
    let driver = Arc::new(ScriptedDriver::new());
    let bus = Arc::new(ObserverBus::default());
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let registry = Arc::new(AgentRegistry::new());
    let memory = Arc::new(
        MemoryService::new(GraphConfig::default())
            .with_entity_store(checkpoints.clone() as Arc<dyn EntityStore>),
    );
    let ctx = Arc::new(EngineCtx {
        planner: planner.clone(),
        driver: driver.clone(),
        memory,
        extractor: Arc::new(PatternExtractor::from_yaml_str(CRM_RULES).unwrap()),
        bus: bus.clone(),
        checkpoints,
        registry: registry.clone(),
        limits: EngineLimits::default(),
    });
    let manager = Arc::new(ThreadManager::new(ctx, Duration::from_secs(3600)));
    let state = Arc::new(AppState::new(manager, bus, registry));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    {
        let state = state.clone();
        tokio::spawn(async move {
            let _ = serve::run_serve_on_listener(listener, state).await;
        });
    }

    TestServer {
        addr,
        state,
        planner,
        driver,
    }
}

/// JSON-RPC process_task request body.
pub fn process_task_body(task_id: &str, thread_id: &str, instruction: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": format!("req-{}", task_id),
        "method": "process_task",
        "params": {
            "taskID": task_id,
            "instruction": instruction,
            "context": {
                "threadID": thread_id,
                "userID": "u1",
                "source": "cli_client",
            },
        },
    })
}
