//! Planner and agent-driver seams.
//!
//! The engine never sees a model provider. It talks to two traits:
//! [`Planner`] (plan / replan, returning a plan or a final textual response)
//! and [`AgentDriver`] (execute one step, possibly asking a human question).
//! [`ScriptedPlanner`] and [`ScriptedDriver`] are deterministic doubles used by
//! tests and the literal end-to-end scenarios; [`OpenAiPlanner`] adapts a real
//! provider; [`RpcAgentDriver`] fans a step out to a domain agent over JSON-RPC.

mod mock;
mod openai;
mod rpc_driver;

pub use mock::{ScriptedDriver, ScriptedPlanner};
pub use openai::OpenAiPlanner;
pub use rpc_driver::RpcAgentDriver;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::engine::{Plan, Step, StepExecution};
use crate::message::Message;
use crate::rpc::RpcError;

/// Error from the planning seam.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("provider: {0}")]
    Provider(String),
    /// The provider answered, but not in a shape that parses into a decision.
    #[error("invalid decision: {0}")]
    InvalidDecision(String),
}

/// Error from the driver seam.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("provider: {0}")]
    Provider(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The step's RPC was cancelled by a user escape before it committed.
    #[error("cancelled")]
    Cancelled,
}

/// Input to [`Planner::plan`].
#[derive(Clone, Debug)]
pub struct PlanRequest {
    pub instruction: String,
    /// Capability -> online agent names, from the registry.
    pub capabilities: BTreeMap<String, Vec<String>>,
    /// Compact memory summary (top important nodes + topic headlines).
    pub memory_digest: String,
}

/// Input to [`Planner::replan`].
#[derive(Clone, Debug)]
pub struct ReplanRequest {
    pub instruction: String,
    /// Pending steps (never the completed ones).
    pub plan: Plan,
    pub plan_offset: usize,
    pub past_steps: Vec<StepExecution>,
    /// Verbatim user modification request from a forced replan, if any.
    pub modification_request: Option<String>,
    /// True when every plan step has executed; the planner should finalize.
    pub all_steps_done: bool,
}

/// A planner's answer: keep working through a plan, or finish with text.
#[derive(Clone, Debug)]
pub enum PlanDecision {
    Plan(Plan),
    Response(String),
}

/// Produces and revises plans. Implementations are opaque to the engine.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, req: &PlanRequest) -> Result<PlanDecision, PlannerError>;
    async fn replan(&self, req: &ReplanRequest) -> Result<PlanDecision, PlannerError>;
}

/// One composed step handed to the driver.
#[derive(Clone, Debug)]
pub struct DriverTask {
    pub task_id: String,
    pub thread_id: String,
    pub user_id: String,
    /// The original user instruction.
    pub instruction: String,
    /// The current plan step.
    pub step: Step,
    /// Rendered memory context (compact summaries, full content for the top hits).
    pub memory_context: String,
    /// Summary of the previous step's outcome, if any.
    pub previous_outcome: Option<String>,
    /// Conversation tail, already trimmed to the token budget.
    pub messages: Vec<Message>,
}

/// What one driver invocation produced.
#[derive(Clone, Debug)]
pub enum DriverOutcome {
    /// The step finished; `payload` is the raw agent output for extraction.
    Completed { summary: String, payload: Value },
    /// The agent needs disambiguation from a human before it can continue.
    NeedsInput { question: String },
    /// The agent returned a structured failure (not a transport error).
    Rejected { reason: String },
}

/// Executes one composed step. May itself call tools or fan out to domain
/// agents; the engine only sees the outcome. The cancellation token fires on a
/// user escape while the call is still in flight.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    async fn execute(
        &self,
        task: &DriverTask,
        cancel: &CancellationToken,
    ) -> Result<DriverOutcome, DriverError>;
}
