//! Engine context: every collaborator the nodes need, injected once.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::checkpoint::{ns, CheckpointError, CheckpointStore};
use crate::codec;
use crate::engine::error::EngineError;
use crate::engine::state::{PendingInterrupt, WorkflowState};
use crate::extract::EntityExtractor;
use crate::memgraph::MemoryService;
use crate::observer::ObserverBus;
use crate::planner::{AgentDriver, Planner};
use crate::registry::AgentRegistry;

/// Engine bounds and executor tuning.
#[derive(Clone, Copy, Debug)]
pub struct EngineLimits {
    /// Hard bound on total workflow steps; larger plans are rejected.
    pub max_steps: usize,
    /// Token budget for the trimmed conversation window.
    pub token_budget: usize,
    /// Memory retrieval window for the executor.
    pub memory_max_age_hours: f64,
    pub memory_min_relevance: f64,
    pub memory_limit: usize,
    /// How many top memories carry full content into the task prompt.
    pub memory_full_content_top: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_steps: 100,
            token_budget: 4000,
            memory_max_age_hours: 2.0,
            memory_min_relevance: 0.3,
            memory_limit: 5,
            memory_full_content_top: 2,
        }
    }
}

/// Shared collaborators, one set per process. No global state: everything the
/// engine touches arrives through this struct.
pub struct EngineCtx {
    pub planner: Arc<dyn Planner>,
    pub driver: Arc<dyn AgentDriver>,
    pub memory: Arc<MemoryService>,
    pub extractor: Arc<dyn EntityExtractor>,
    pub bus: Arc<ObserverBus>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub registry: Arc<AgentRegistry>,
    pub limits: EngineLimits,
}

impl EngineCtx {
    /// Persists the state to both checkpoint namespaces. A step's effects are
    /// not complete until this returns.
    pub async fn checkpoint(&self, state: &WorkflowState) -> Result<(), EngineError> {
        let blob = codec::encode_state(state)
            .map_err(|e| EngineError::Checkpoint(CheckpointError::Serialization(e.to_string())))?;
        self.checkpoints
            .put(&ns::workflow_instances(), &state.task_id, &blob)
            .await?;
        self.checkpoints
            .put(
                &ns::memory(&state.user_id),
                &ns::thread_state_key(&state.thread_id),
                &blob,
            )
            .await
            .map_err(|e| {
                error!(thread = %state.thread_id, error = %e, "thread-state checkpoint failed");
                EngineError::Checkpoint(e)
            })?;
        Ok(())
    }

    /// Loads the latest checkpoint for a thread, if any.
    pub async fn load_thread_state(
        &self,
        user_id: &str,
        thread_id: &str,
    ) -> Result<Option<WorkflowState>, EngineError> {
        let blob = self
            .checkpoints
            .get(&ns::memory(user_id), &ns::thread_state_key(thread_id))
            .await?;
        match blob {
            Some(blob) => Ok(Some(codec::decode_state(&blob).map_err(|e| {
                EngineError::Checkpoint(CheckpointError::Serialization(e.to_string()))
            })?)),
            None => Ok(None),
        }
    }
}

/// Escape hatch between the transport surface and one engine loop. The surface
/// sets a pending user escape and fires the token; the executor observes both
/// at its safe points.
pub struct InterruptSignal {
    pending: Mutex<Option<PendingInterrupt>>,
    token: Mutex<CancellationToken>,
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Requests a user escape: pending flag plus token cancel. The in-flight
    /// driver call aborts only if it has not produced a result yet.
    pub fn request_escape(&self, reason: Option<String>) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending = Some(PendingInterrupt {
            kind: wire_event::InterruptKind::UserEscape,
            reason,
            question: None,
        });
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
    }

    /// Takes the pending escape, if any (executor safe point).
    pub fn take_pending(&self) -> Option<PendingInterrupt> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Token for the next driver call.
    pub fn current_token(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Arms a fresh token (run and resume entry points call this).
    pub fn reset(&self) {
        let mut token = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *token = CancellationToken::new();
    }
}

impl Default for InterruptSignal {
    fn default() -> Self {
        Self::new()
    }
}
