//! Agent driver that fans one step out to a domain agent over JSON-RPC.
//!
//! Agent selection: the step's `hinted_agent` wins; otherwise `hinted_tool` is
//! treated as a capability and looked up in the registry. No match is a
//! `Rejected` outcome (the replanner routes around it), never an engine error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AgentDriver, DriverError, DriverOutcome, DriverTask};
use crate::registry::{AgentCard, AgentRegistry};
use crate::rpc::{A2aClient, RpcError, TaskRequest, TaskResponse};

/// Driver over [`A2aClient`] + [`AgentRegistry`]. The circuit breaker and retry
/// loop live inside the client; this layer maps outcomes.
pub struct RpcAgentDriver {
    client: Arc<A2aClient>,
    registry: Arc<AgentRegistry>,
}

impl RpcAgentDriver {
    pub fn new(client: Arc<A2aClient>, registry: Arc<AgentRegistry>) -> Self {
        Self { client, registry }
    }

    fn pick_agent(&self, task: &DriverTask) -> Option<AgentCard> {
        if let Some(name) = &task.step.hinted_agent {
            if self.registry.is_online(name) {
                return self.registry.card(name);
            }
        }
        if let Some(capability) = &task.step.hinted_tool {
            return self
                .registry
                .agents_for_capability(capability)
                .into_iter()
                .next();
        }
        None
    }
}

#[async_trait]
impl AgentDriver for RpcAgentDriver {
    async fn execute(
        &self,
        task: &DriverTask,
        cancel: &CancellationToken,
    ) -> Result<DriverOutcome, DriverError> {
        let Some(card) = self.pick_agent(task) else {
            let hint = task
                .step
                .hinted_agent
                .clone()
                .or_else(|| task.step.hinted_tool.clone())
                .unwrap_or_else(|| "unspecified".to_string());
            warn!(step = %task.step.description, hint = %hint, "no online agent for step");
            return Ok(DriverOutcome::Rejected {
                reason: format!("no online agent advertises `{}`", hint),
            });
        };

        let request = TaskRequest {
            task_id: task.task_id.clone(),
            thread_id: task.thread_id.clone(),
            instruction: task.step.description.clone(),
            context: json!({
                "userID": task.user_id,
                "originalInstruction": task.instruction,
                "memory": task.memory_context,
                "previousOutcome": task.previous_outcome,
            }),
        };
        debug!(agent = %card.name, step = %task.step.description, "dispatching step");

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DriverError::Cancelled),
            out = self.client.process_task(&card.endpoint, &request) => out,
        };

        match response {
            Ok(resp) => Ok(Self::map_response(resp)),
            Err(RpcError::AgentRejected { reason }) => Ok(DriverOutcome::Rejected { reason }),
            Err(e) => Err(DriverError::Rpc(e)),
        }
    }
}

impl RpcAgentDriver {
    fn map_response(resp: TaskResponse) -> DriverOutcome {
        if resp.status == TaskResponse::STATUS_INPUT_REQUIRED {
            return DriverOutcome::NeedsInput {
                question: resp
                    .question
                    .or(resp.message)
                    .unwrap_or_else(|| "the agent needs more information".to_string()),
            };
        }
        let summary = resp.message.unwrap_or_else(|| {
            if resp.output.is_null() {
                "step completed".to_string()
            } else {
                resp.output.to_string()
            }
        });
        DriverOutcome::Completed {
            summary,
            payload: resp.output,
        }
    }
}
