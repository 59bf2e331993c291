//! # Switchboard
//!
//! A plan-and-execute orchestrator for remote domain agents. One natural-language
//! instruction comes in; the engine produces a short ordered plan, dispatches each
//! step to an agent driver (which may fan out to domain agents over JSON-RPC),
//! replans on intermediate results, and streams progress events to subscribers.
//! Interrupts — user escape and agent questions — pause the workflow at safe
//! points and resume from the last checkpoint.
//!
//! ## Design principles
//!
//! - **Single state type per thread**: a [`WorkflowState`] flows through the
//!   planner → executor → replanner nodes; the engine is the only writer.
//! - **Everything injected**: the circuit board, memory service, observer bus,
//!   checkpoint store, and agent registry are all handed to the engine; there is
//!   no global mutable state.
//! - **Interrupt as control flow**: a node raises [`WorkflowInterrupt`] through the
//!   error channel; the engine checkpoints first, then surfaces it to the caller.
//!
//! ## Main modules
//!
//! - [`engine`]: [`WorkflowState`], [`Plan`], the four-node state machine, the
//!   per-thread engine and [`ThreadManager`].
//! - [`memgraph`]: per-user typed memory graph ([`MemoryGraph`], [`MemoryService`])
//!   with dedup-merge ingest, weighted retrieval, PageRank, clustering and decay.
//! - [`rpc`]: JSON-RPC 2.0 client for domain agents ([`A2aClient`]) with retry
//!   and error classification.
//! - [`breaker`]: per-endpoint circuit breaker ([`CircuitBreaker`], [`BreakerBoard`]).
//! - [`registry`]: agent cards, capability index, health polling ([`AgentRegistry`]).
//! - [`extract`]: data-driven entity extraction from agent payloads ([`PatternExtractor`]).
//! - [`observer`]: in-process pub/sub with per-thread replay ([`ObserverBus`]).
//! - [`checkpoint`]: durable KV + entity schema ([`CheckpointStore`], [`SqliteCheckpointStore`]).
//! - [`planner`]: [`Planner`] / [`AgentDriver`] seams, scripted mocks, the
//!   OpenAI adapter and the RPC fan-out driver.
//! - [`prompt`]: deterministic plan/execute/replan templates and message trimming.
//! - [`message`]: conversation [`Message`] including tool-call/result pairing.
//! - [`codec`]: checkpoint codecs and ISO-8601 millisecond timestamps.

pub mod breaker;
pub mod checkpoint;
pub mod codec;
pub mod engine;
pub mod extract;
pub mod memgraph;
pub mod message;
pub mod observer;
pub mod planner;
pub mod prompt;
pub mod registry;
pub mod rpc;

pub use breaker::{BreakerBoard, BreakerConfig, CircuitBreaker, CircuitState};
pub use checkpoint::{
    CheckpointError, CheckpointStore, EntityStore, MemoryCheckpointStore, Namespace,
    SqliteCheckpointStore,
};
pub use engine::{
    EngineCtx, EngineError, EngineLimits, PendingInterrupt, Plan, ResumeCommand, Step,
    StepExecution, TaskResult, TaskStatus, ThreadEngine, ThreadManager, ThreadStatus,
    WorkflowInterrupt, WorkflowState,
};
pub use extract::{EntityCandidate, EntityExtractor, EntityRule, PatternExtractor};
pub use memgraph::{
    EdgeType, Embedder, GraphError, MemoryGraph, MemoryKind, MemoryNode, MemoryService, NodeDraft,
    RetrievalQuery,
};
pub use message::Message;
pub use observer::ObserverBus;
pub use planner::{
    AgentDriver, DriverError, DriverOutcome, DriverTask, OpenAiPlanner, PlanDecision, Planner,
    PlannerError, RpcAgentDriver, ScriptedDriver, ScriptedPlanner,
};
pub use registry::{AgentCard, AgentRegistry, CommunicationMode, RegistryError};
pub use rpc::{A2aClient, PoolConfig, RetryConfig, RpcError, TaskRequest, TaskResponse};
