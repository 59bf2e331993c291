//! Process lifecycle: bring-up order, wiring, graceful shutdown.
//!
//! Boot order is stores → registry → RPC client → observer bus → transport.
//! On shutdown the surface refuses new tasks, running engines get a grace
//! window to land their checkpoints, then the process exits.

use std::sync::Arc;
use std::time::Duration;

use config::Settings;
use switchboard::{
    A2aClient, AgentRegistry, BreakerBoard, EngineCtx, EngineLimits, MemoryService, ObserverBus,
    OpenAiPlanner, PatternExtractor, RpcAgentDriver, ThreadManager,
};
use switchboard::checkpoint::{
    CheckpointStore, EntityStore, MemoryCheckpointStore, SqliteCheckpointStore,
};
use switchboard::memgraph::GraphConfig;
use switchboard::rpc::{PoolConfig, RetryConfig};
use tracing::{info, warn};

use crate::app::AppState;

const HEALTH_POLL_EVERY: Duration = Duration::from_secs(60);
const GC_EVERY: Duration = Duration::from_secs(300);
const GRACE_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the full object graph from settings. Separate from [`run`] so tests
/// can assemble a state with doubles instead.
pub fn build_state(settings: &Settings) -> Result<Arc<AppState>, Box<dyn std::error::Error + Send + Sync>> {
    // C7: checkpoint + entity stores
    let (checkpoints, entities): (Arc<dyn CheckpointStore>, Arc<dyn EntityStore>) =
        match &settings.checkpoint_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let store = Arc::new(SqliteCheckpointStore::new(dir.join("switchboard.db"))?);
                info!(path = %dir.display(), "sqlite checkpoint store");
                (
                    store.clone() as Arc<dyn CheckpointStore>,
                    store as Arc<dyn EntityStore>,
                )
            }
            None => {
                warn!("no ORCH_CHECKPOINT_DIR set; checkpoints are in-memory only");
                let store = Arc::new(MemoryCheckpointStore::new());
                (
                    store.clone() as Arc<dyn CheckpointStore>,
                    store as Arc<dyn EntityStore>,
                )
            }
        };

    // C3: agent registry
    let registry = Arc::new(AgentRegistry::new());
    if let Some(path) = &settings.agents_config {
        let count = registry.load_file(path)?;
        info!(count, path = %path.display(), "agent registry loaded");
    } else {
        warn!("no ORCH_AGENTS_CONFIG set; registry starts empty");
    }

    // C1 + C2: RPC client over the shared breaker board
    let breakers = Arc::new(BreakerBoard::default());
    let client = Arc::new(A2aClient::new(
        PoolConfig::default(),
        RetryConfig::default(),
        breakers,
    )?);
    let _health_poll = registry.spawn_health_poll(client.clone(), HEALTH_POLL_EVERY);

    // C6: observer bus
    let bus = Arc::new(ObserverBus::default());

    // C4 + C5: memory service and extractor
    let memory = Arc::new(
        MemoryService::new(GraphConfig::default()).with_entity_store(entities),
    );
    let extractor = match &settings.entity_rules {
        Some(path) => {
            let extractor = PatternExtractor::from_yaml_file(path)?;
            info!(rules = extractor.rule_count(), path = %path.display(), "entity rules loaded");
            Arc::new(extractor)
        }
        None => {
            warn!("no ORCH_ENTITY_RULES set; entity extraction disabled");
            Arc::new(PatternExtractor::empty())
        }
    };

    // Planner seam and driver fan-out
    let model =
        std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let planner = Arc::new(OpenAiPlanner::new(model));
    let driver = Arc::new(RpcAgentDriver::new(client, registry.clone()));

    // C8: engine context and thread manager
    let ctx = Arc::new(EngineCtx {
        planner,
        driver,
        memory,
        extractor,
        bus: bus.clone(),
        checkpoints,
        registry: registry.clone(),
        limits: EngineLimits {
            max_steps: settings.max_steps,
            token_budget: settings.token_budget,
            ..EngineLimits::default()
        },
    });
    let manager = Arc::new(ThreadManager::new(ctx, settings.idle_ttl));
    let _gc = manager.spawn_gc(GC_EVERY);

    Ok(Arc::new(AppState::new(manager, bus, registry)))
}

/// Runs the orchestrator until ctrl-c, then drains within the grace window.
pub async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = build_state(&settings)?;
    let addr = format!("0.0.0.0:{}", settings.port);

    {
        let state = state.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                state.begin_shutdown();
            }
        });
    }

    let manager = state.manager.clone();
    crate::run_serve(&addr, state).await?;

    info!("draining running workflows");
    manager.shutdown(GRACE_TIMEOUT).await;
    info!("switchboard stopped");
    Ok(())
}
