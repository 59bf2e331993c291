//! Per-thread engine and the process-wide thread manager.
//!
//! One engine loop per active thread; the engine is the sole writer of its
//! `WorkflowState` and holds the state lock for the whole run segment, so
//! resume commands serialize behind the current step's commit. Interrupts are
//! flagged through [`InterruptSignal`] and observed at the executor's safe
//! points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;
use wire_event::{ObserverEvent, PlanView, StepOutcome};

use crate::engine::ctx::{EngineCtx, InterruptSignal};
use crate::engine::error::EngineError;
use crate::engine::graph::{CompiledGraph, StateGraph, START};
use crate::engine::nodes::{
    ExecutorNode, PlannerNode, ReplannerNode, NODE_EXECUTOR, NODE_PLANNER, NODE_REPLANNER,
};
use crate::engine::state::{
    PendingInterrupt, ResumeCommand, StepExecution, WorkflowState,
};
use crate::memgraph::{MemoryKind, NodeDraft};
use crate::message::Message;

/// Thread lifecycle, mirrored into the transport surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Idle,
    Planning,
    Executing,
    Interrupted,
    Completed,
    Failed,
}

/// How a `process_task` (or resume) call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Interrupted,
}

/// Terminal result of one engine drive: either a final response or an
/// interrupt descriptor with enough data to resume. Resume state itself lives
/// in the checkpoint, never in this value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<PendingInterrupt>,
    pub plan: PlanView,
}

const ORCHESTRATOR_SYSTEM_PROMPT: &str =
    "You coordinate specialist agents to fulfil the user's request step by step.";

/// One conversational thread: compiled workflow graph + exclusive state slot.
pub struct ThreadEngine {
    thread_id: String,
    user_id: String,
    ctx: Arc<EngineCtx>,
    graph: CompiledGraph<WorkflowState>,
    signal: Arc<InterruptSignal>,
    state: AsyncMutex<Option<WorkflowState>>,
    status: Mutex<ThreadStatus>,
    last_active: Mutex<DateTime<Utc>>,
}

impl ThreadEngine {
    pub fn new(
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
        ctx: Arc<EngineCtx>,
    ) -> Result<Self, EngineError> {
        let signal = Arc::new(InterruptSignal::new());
        let mut builder = StateGraph::new();
        builder.add_node(Arc::new(PlannerNode { ctx: ctx.clone() }));
        builder.add_node(Arc::new(ExecutorNode {
            ctx: ctx.clone(),
            signal: signal.clone(),
        }));
        builder.add_node(Arc::new(ReplannerNode { ctx: ctx.clone() }));
        builder.add_edge(START, NODE_PLANNER);
        builder.add_edge(NODE_PLANNER, NODE_EXECUTOR);
        builder.add_edge(NODE_EXECUTOR, NODE_REPLANNER);
        let graph = builder.compile()?;

        Ok(Self {
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            ctx,
            graph,
            signal,
            state: AsyncMutex::new(None),
            status: Mutex::new(ThreadStatus::Idle),
            last_active: Mutex::new(Utc::now()),
        })
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> ThreadStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: ThreadStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner()) = Utc::now();
    }

    fn busy(&self) -> bool {
        matches!(
            self.status(),
            ThreadStatus::Planning | ThreadStatus::Executing
        )
    }

    /// Starts one task on this thread. Fails when a task is already running.
    pub async fn run_task(
        &self,
        task_id: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Result<TaskResult, EngineError> {
        if self.busy() {
            return Err(EngineError::InvalidState(format!(
                "thread {} already executing",
                self.thread_id
            )));
        }
        self.set_status(ThreadStatus::Planning);
        let task_id = task_id.into();
        let instruction = instruction.into();

        // Escapes sent between tasks do not apply to the new one.
        self.signal.take_pending();
        self.signal.reset();

        let mut guard = self.state.lock().await;
        let mut state = WorkflowState::new(
            self.thread_id.clone(),
            task_id,
            self.user_id.clone(),
            instruction.clone(),
        );
        state
            .messages
            .push(Message::system(ORCHESTRATOR_SYSTEM_PROMPT));
        state.messages.push(Message::user(instruction.clone()));

        // Anchor for step-1 retrieval.
        if let Err(e) = self
            .ctx
            .memory
            .ingest(
                &self.user_id,
                NodeDraft::new(MemoryKind::ConversationFact, instruction.clone())
                    .with_content(serde_json::json!({ "instruction": instruction }))
                    .with_tags(["conversation"])
                    .with_relevance(0.6),
            )
            .await
        {
            warn!(error = %e, "conversation fact ingest failed");
        }

        *guard = Some(state);
        self.drive(&mut guard, None).await
    }

    /// Resumes a paused workflow with the typed command. `force_replan` routes
    /// to the replanner carrying the modification request; otherwise the input
    /// answers the pending question and the executor continues.
    pub async fn resume(&self, cmd: ResumeCommand) -> Result<TaskResult, EngineError> {
        if self.busy() {
            return Err(EngineError::InvalidState(format!(
                "thread {} already executing",
                self.thread_id
            )));
        }
        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else {
            return Err(EngineError::InvalidState("no workflow to resume".to_string()));
        };
        let Some(interrupt) = state.interrupt.take() else {
            return Err(EngineError::InvalidState(
                "no pending interrupt on this thread".to_string(),
            ));
        };

        self.ctx.bus.emit(
            &state.thread_id,
            Some(state.task_id.clone()),
            &ObserverEvent::InterruptResume {
                payload: serde_json::to_value(&cmd).unwrap_or(serde_json::Value::Null),
            },
        );
        self.signal.take_pending();
        self.signal.reset();

        let start = if cmd.force_replan {
            state.force_replan = true;
            state.modification_request = Some(cmd.input.clone());
            // The step that asked the question never completed; the user chose
            // to replan around it, so it goes down as skipped.
            if interrupt.kind == wire_event::InterruptKind::HumanInput {
                if let Some(step) = state.current_step().cloned() {
                    let now = Utc::now();
                    let execution = StepExecution {
                        seq_no: state.current_index(),
                        description: step.description,
                        started_at: now,
                        ended_at: now,
                        outcome: StepOutcome::Skipped,
                        summary: "skipped by user request".to_string(),
                        produced_entity_ids: vec![],
                        error: None,
                    };
                    state.record_step(execution.clone());
                    crate::engine::nodes::announce_step(&self.ctx, state, &execution);
                }
            }
            NODE_REPLANNER
        } else {
            state.messages.push(Message::user(cmd.input.clone()));
            NODE_EXECUTOR
        };
        self.ctx.checkpoint(state).await?;
        self.drive(&mut guard, Some(start)).await
    }

    /// Flags a user escape. The engine observes it at the next safe point; the
    /// current step's RPC is cancelled only if it has not yet committed.
    pub fn request_escape(&self, reason: Option<String>) {
        info!(thread = %self.thread_id, "user escape requested");
        self.signal.request_escape(reason);
    }

    /// Loads the thread's checkpoint and, when a task was mid-flight, re-enters
    /// the workflow. Returns `None` when there is nothing to recover.
    pub async fn recover(&self) -> Result<Option<TaskResult>, EngineError> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(None);
        }
        let Some(state) = self
            .ctx
            .load_thread_state(&self.user_id, &self.thread_id)
            .await?
        else {
            return Ok(None);
        };

        if state.response.is_some() {
            let result = TaskResult {
                status: TaskStatus::Completed,
                response: state.response.clone(),
                interrupt: None,
                plan: state.plan_view(),
            };
            *guard = Some(state);
            self.set_status(ThreadStatus::Completed);
            return Ok(Some(result));
        }

        if state.interrupt.is_some() {
            let result = TaskResult {
                status: TaskStatus::Interrupted,
                response: None,
                interrupt: state.interrupt.clone(),
                plan: state.plan_view(),
            };
            *guard = Some(state);
            self.set_status(ThreadStatus::Interrupted);
            return Ok(Some(result));
        }

        // Crash mid-task: replay from the last checkpoint. Steps whose
        // checkpoint landed are never re-executed; the one in flight is.
        info!(thread = %self.thread_id, "recovering in-flight workflow");
        let start = if state.plan.is_empty() && state.past_steps.is_empty() {
            NODE_PLANNER
        } else {
            NODE_EXECUTOR
        };
        self.set_status(ThreadStatus::Planning);
        self.signal.reset();
        *guard = Some(state);
        self.drive(&mut guard, Some(start)).await.map(Some)
    }

    async fn drive(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, Option<WorkflowState>>,
        start_at: Option<&str>,
    ) -> Result<TaskResult, EngineError> {
        let state = guard
            .as_mut()
            .ok_or_else(|| EngineError::InvalidState("no workflow state".to_string()))?;
        self.set_status(ThreadStatus::Executing);

        let outcome = self.graph.run(state, start_at).await;
        match outcome {
            Ok(()) => {
                self.set_status(ThreadStatus::Completed);
                Ok(TaskResult {
                    status: TaskStatus::Completed,
                    response: state.response.clone(),
                    interrupt: None,
                    plan: state.plan_view(),
                })
            }
            Err(EngineError::Interrupted(interrupt)) => {
                let pending = PendingInterrupt {
                    kind: interrupt.kind,
                    reason: interrupt.reason,
                    question: interrupt.question,
                };
                state.interrupt = Some(pending.clone());
                // The interrupted status never loses state: checkpoint first,
                // then surface.
                self.ctx.checkpoint(state).await?;
                self.ctx.bus.emit(
                    &state.thread_id,
                    Some(state.task_id.clone()),
                    &ObserverEvent::Interrupt {
                        kind: pending.kind,
                        reason: pending.reason.clone(),
                        question: pending.question.clone(),
                    },
                );
                self.set_status(ThreadStatus::Interrupted);
                Ok(TaskResult {
                    status: TaskStatus::Interrupted,
                    response: None,
                    interrupt: Some(pending),
                    plan: state.plan_view(),
                })
            }
            Err(e) => {
                warn!(thread = %self.thread_id, error = %e, "workflow failed");
                // Terminal snapshot for subscribers before the error surfaces.
                self.ctx.bus.emit(
                    &state.thread_id,
                    Some(state.task_id.clone()),
                    &ObserverEvent::PlanUpdated {
                        plan: state.plan_view(),
                    },
                );
                self.set_status(ThreadStatus::Failed);
                Err(e)
            }
        }
    }
}

/// Process-wide thread table: creation, routing, idle GC, shutdown.
pub struct ThreadManager {
    ctx: Arc<EngineCtx>,
    threads: DashMap<String, Arc<ThreadEngine>>,
    idle_ttl: Duration,
    closed: AtomicBool,
}

impl ThreadManager {
    pub fn new(ctx: Arc<EngineCtx>, idle_ttl: Duration) -> Self {
        Self {
            ctx,
            threads: DashMap::new(),
            idle_ttl,
            closed: AtomicBool::new(false),
        }
    }

    pub fn ctx(&self) -> &Arc<EngineCtx> {
        &self.ctx
    }

    /// Refuse new tasks (shutdown has begun).
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the engine for a thread, creating it on first use. A random
    /// thread id is minted when the caller did not supply one.
    pub fn engine_for(
        &self,
        thread_id: Option<&str>,
        user_id: &str,
    ) -> Result<Arc<ThreadEngine>, EngineError> {
        if self.is_closed() {
            return Err(EngineError::InvalidState("orchestrator shutting down".into()));
        }
        let thread_id = thread_id
            .map(|t| t.to_string())
            .unwrap_or_else(|| format!("thread-{}", Uuid::new_v4()));
        // Entry API so two racing callers for a new thread share one engine
        // (one writer per thread state).
        match self.threads.entry(thread_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(e) => Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let engine = Arc::new(ThreadEngine::new(thread_id, user_id, self.ctx.clone())?);
                v.insert(engine.clone());
                Ok(engine)
            }
        }
    }

    pub fn get(&self, thread_id: &str) -> Option<Arc<ThreadEngine>> {
        self.threads.get(thread_id).map(|e| e.clone())
    }

    /// Flags a user escape on a thread. Returns false for unknown threads.
    pub fn interrupt(&self, thread_id: &str, reason: Option<String>) -> bool {
        match self.threads.get(thread_id) {
            Some(engine) => {
                engine.request_escape(reason);
                true
            }
            None => false,
        }
    }

    /// Resumes a paused thread, recovering it from its checkpoint if the
    /// process restarted in between.
    pub async fn resume(
        &self,
        thread_id: &str,
        user_id: &str,
        cmd: ResumeCommand,
    ) -> Result<TaskResult, EngineError> {
        let engine = self.engine_for(Some(thread_id), user_id)?;
        let _ = engine.recover().await?;
        engine.resume(cmd).await
    }

    pub fn active_count(&self) -> usize {
        self.threads
            .iter()
            .filter(|e| {
                matches!(
                    e.status(),
                    ThreadStatus::Planning | ThreadStatus::Executing
                )
            })
            .count()
    }

    /// One GC pass: drops threads idle past the TTL (their checkpoints are
    /// already sealed) and sweeps decayed memories.
    pub async fn gc_once(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.idle_ttl).unwrap_or(chrono::Duration::hours(24));
        let doomed: Vec<String> = self
            .threads
            .iter()
            .filter(|e| {
                !matches!(
                    e.status(),
                    ThreadStatus::Planning | ThreadStatus::Executing
                ) && now - e.last_active() > ttl
            })
            .map(|e| e.key().clone())
            .collect();
        for thread_id in &doomed {
            info!(thread = %thread_id, "idle thread collected");
            self.threads.remove(thread_id);
            self.ctx.bus.forget_thread(thread_id);
        }
        self.ctx.memory.sweep_all(now).await;
        doomed.len()
    }

    /// Spawns the periodic GC task.
    pub fn spawn_gc(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.gc_once(Utc::now()).await;
            }
        })
    }

    /// Shutdown: refuse new tasks, then wait up to `grace` for running engines.
    pub async fn shutdown(&self, grace: Duration) {
        self.close();
        let deadline = tokio::time::Instant::now() + grace;
        while self.active_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let leftover = self.active_count();
        if leftover > 0 {
            warn!(running = leftover, "grace timeout with engines still running");
        }
    }
}
