//! The four-node workflow: Planner → Executor → Replanner → terminal.
//!
//! The executor's commit segment (extract → ingest → append → checkpoint) runs
//! without suspension points that observe resume commands; an interrupt raised
//! by a node always happens before the segment starts, so the persisted state
//! is either pre-step or fully committed, never in between.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;
use wire_event::{ObserverEvent, StepOutcome};

use crate::engine::ctx::{EngineCtx, InterruptSignal};
use crate::engine::error::{EngineError, WorkflowInterrupt};
use crate::engine::graph::{Next, Node};
use crate::engine::state::{Step, StepExecution, WorkflowState};
use crate::memgraph::{EdgeType, MemoryGraph, MemoryKind, NodeDraft, RetrievalQuery, ScoredNode};
use crate::message::Message;
use crate::planner::{DriverError, DriverOutcome, DriverTask, PlanDecision, PlanRequest, ReplanRequest};
use crate::prompt;

pub(crate) const NODE_PLANNER: &str = "planner";
pub(crate) const NODE_EXECUTOR: &str = "executor";
pub(crate) const NODE_REPLANNER: &str = "replanner";

/// Emits `TaskCompleted` once per seq_no (replay suppression) plus the plan update.
pub(crate) fn announce_step(ctx: &EngineCtx, state: &mut WorkflowState, execution: &StepExecution) {
    let seq = execution.seq_no;
    if !state.announced_steps.contains(&seq) {
        state.announced_steps.push(seq);
        ctx.bus.emit(
            &state.thread_id,
            Some(state.task_id.clone()),
            &ObserverEvent::TaskCompleted {
                task_id: state.task_id.clone(),
                index: seq,
                summary: execution.summary.clone(),
                outcome: execution.outcome,
            },
        );
    }
    ctx.bus.emit(
        &state.thread_id,
        Some(state.task_id.clone()),
        &ObserverEvent::PlanUpdated {
            plan: state.plan_view(),
        },
    );
}

async fn memory_digest_for(graph: &MemoryGraph) -> String {
    let importance = graph.importance().await;
    let mut ranked: Vec<(Uuid, f64)> = importance.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut important = Vec::new();
    for (id, score) in ranked.into_iter().take(5) {
        if let Some(node) = graph.node(id).await {
            important.push(ScoredNode { node, score });
        }
    }

    let mut headlines = Vec::new();
    for cluster in graph.clusters().await.into_iter().take(3) {
        if cluster.len() < 2 {
            continue;
        }
        if let Some(node) = graph.node(cluster[0]).await {
            headlines.push(node.summary);
        }
    }
    prompt::memory_digest(&important, &headlines)
}

/// Produces the initial plan.
pub struct PlannerNode {
    pub ctx: Arc<EngineCtx>,
}

#[async_trait]
impl Node<WorkflowState> for PlannerNode {
    fn id(&self) -> &str {
        NODE_PLANNER
    }

    async fn run(&self, mut state: WorkflowState) -> Result<(WorkflowState, Next), EngineError> {
        let graph = self.ctx.memory.graph_for(&state.user_id).await?;
        let request = PlanRequest {
            instruction: state.input.clone(),
            capabilities: self.ctx.registry.capability_catalog(),
            memory_digest: memory_digest_for(&graph).await,
        };

        match self.ctx.planner.plan(&request).await? {
            PlanDecision::Response(text) => {
                state.response = Some(text);
                self.ctx.checkpoint(&state).await?;
                Ok((state, Next::End))
            }
            PlanDecision::Plan(plan) => {
                if plan.len() > self.ctx.limits.max_steps {
                    return Err(EngineError::PlanTooLarge {
                        got: plan.len(),
                        max: self.ctx.limits.max_steps,
                    });
                }
                info!(thread = %state.thread_id, steps = plan.len(), "plan created");
                state.plan = plan;
                state.plan_offset = 0;
                self.ctx.bus.emit(
                    &state.thread_id,
                    Some(state.task_id.clone()),
                    &ObserverEvent::PlanCreated {
                        task_id: state.task_id.clone(),
                        steps: state.plan.descriptions(),
                    },
                );
                self.ctx.bus.emit(
                    &state.thread_id,
                    Some(state.task_id.clone()),
                    &ObserverEvent::PlanUpdated {
                        plan: state.plan_view(),
                    },
                );
                self.ctx.checkpoint(&state).await?;
                let next = if state.plan.is_empty() {
                    Next::Node(NODE_REPLANNER.to_string())
                } else {
                    Next::Node(NODE_EXECUTOR.to_string())
                };
                Ok((state, next))
            }
        }
    }
}

/// Runs one step through the agent driver and commits its effects.
pub struct ExecutorNode {
    pub ctx: Arc<EngineCtx>,
    pub signal: Arc<InterruptSignal>,
}

impl ExecutorNode {
    async fn ingest_results(
        &self,
        state: &mut WorkflowState,
        step: &Step,
        summary: &str,
        payload: &serde_json::Value,
    ) -> Result<Vec<Uuid>, EngineError> {
        let candidates = self.ctx.extractor.extract(payload);
        let mut entity_ids = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let mut tags = candidate.tags.clone();
            tags.push(candidate.entity_type.clone());
            let draft = NodeDraft::new(
                MemoryKind::DomainEntity,
                format!(
                    "{} {} ({})",
                    candidate.entity_type, candidate.entity_id, candidate.entity_system
                ),
            )
            .with_content(candidate.context.clone())
            .with_tags(tags)
            .with_relevance(candidate.confidence)
            .with_entity(&candidate.entity_id, &candidate.entity_system);

            let stored = self.ctx.memory.ingest(&state.user_id, draft).await?;
            self.ctx.bus.emit(
                &state.thread_id,
                Some(state.task_id.clone()),
                &ObserverEvent::MemoryNodeAdded {
                    node: stored.node.snapshot(),
                },
            );
            if let Some(prev) = state.last_action_node {
                match self
                    .ctx
                    .memory
                    .relate(&state.user_id, prev, stored.node.node_id, EdgeType::LedTo, 0.6)
                    .await
                {
                    Ok(edge) => {
                        self.ctx.bus.emit(
                            &state.thread_id,
                            Some(state.task_id.clone()),
                            &ObserverEvent::MemoryEdgeAdded {
                                from: edge.from.to_string(),
                                to: edge.to.to_string(),
                                edge_type: edge.edge_type.as_str().to_string(),
                                strength: edge.strength,
                            },
                        );
                    }
                    Err(e) => warn!(error = %e, "led_to edge to entity skipped"),
                }
            }
            entity_ids.push(stored.node.node_id);
        }

        let action_draft = NodeDraft::new(
            MemoryKind::CompletedAction,
            format!("Completed: {}", step.description),
        )
        .with_content(json!({
            "step": step.description,
            "response": summary,
            "entities": entity_ids,
        }))
        .with_tags(["action"])
        .with_relevance(0.7);
        let action = self.ctx.memory.ingest(&state.user_id, action_draft).await?;
        self.ctx.bus.emit(
            &state.thread_id,
            Some(state.task_id.clone()),
            &ObserverEvent::MemoryNodeAdded {
                node: action.node.snapshot(),
            },
        );
        if let Some(prev) = state.last_action_node {
            match self
                .ctx
                .memory
                .relate(&state.user_id, prev, action.node.node_id, EdgeType::LedTo, 0.9)
                .await
            {
                Ok(edge) => {
                    self.ctx.bus.emit(
                        &state.thread_id,
                        Some(state.task_id.clone()),
                        &ObserverEvent::MemoryEdgeAdded {
                            from: edge.from.to_string(),
                            to: edge.to.to_string(),
                            edge_type: edge.edge_type.as_str().to_string(),
                            strength: edge.strength,
                        },
                    );
                }
                Err(e) => warn!(error = %e, "led_to edge between actions skipped"),
            }
        }
        state.last_action_node = Some(action.node.node_id);
        Ok(entity_ids)
    }
}

#[async_trait]
impl Node<WorkflowState> for ExecutorNode {
    fn id(&self) -> &str {
        NODE_EXECUTOR
    }

    async fn run(&self, mut state: WorkflowState) -> Result<(WorkflowState, Next), EngineError> {
        // Safe point: a user escape freezes the engine here, before any effects.
        if let Some(pending) = self.signal.take_pending() {
            return Err(WorkflowInterrupt {
                kind: pending.kind,
                reason: pending.reason,
                question: pending.question,
            }
            .into());
        }

        let Some(step) = state.current_step().cloned() else {
            return Ok((state, Next::Node(NODE_REPLANNER.to_string())));
        };

        let query = RetrievalQuery::new(format!("{} {}", step.description, state.input))
            .with_max_age_hours(self.ctx.limits.memory_max_age_hours)
            .with_min_relevance(self.ctx.limits.memory_min_relevance)
            .with_limit(self.ctx.limits.memory_limit);
        let hits = self
            .ctx
            .memory
            .retrieve(&state.user_id, &query, Utc::now())
            .await?;

        let task = DriverTask {
            task_id: state.task_id.clone(),
            thread_id: state.thread_id.clone(),
            user_id: state.user_id.clone(),
            instruction: state.input.clone(),
            step: step.clone(),
            memory_context: prompt::render_memory_context(
                &hits,
                self.ctx.limits.memory_full_content_top,
            ),
            previous_outcome: state.past_steps.last().map(|s| s.summary.clone()),
            messages: prompt::trim_messages(&state.messages, 1, self.ctx.limits.token_budget),
        };

        self.ctx.bus.emit(
            &state.thread_id,
            Some(state.task_id.clone()),
            &ObserverEvent::TaskStarted {
                task_id: state.task_id.clone(),
                index: state.current_index(),
                description: step.description.clone(),
            },
        );

        let started_at = Utc::now();
        let token = self.signal.current_token();
        let outcome = self.ctx.driver.execute(&task, &token).await;

        let (outcome_kind, summary, payload, error) = match outcome {
            Ok(DriverOutcome::Completed { summary, payload }) => {
                (StepOutcome::Completed, summary, payload, None)
            }
            Ok(DriverOutcome::NeedsInput { question }) => {
                // A racing user escape outranks the agent's question.
                if let Some(pending) = self.signal.take_pending() {
                    return Err(WorkflowInterrupt {
                        kind: pending.kind,
                        reason: pending.reason,
                        question: pending.question,
                    }
                    .into());
                }
                return Err(WorkflowInterrupt::human_input(question).into());
            }
            Ok(DriverOutcome::Rejected { reason }) => {
                let summary = format!("agent rejected the step: {}", reason);
                (StepOutcome::Failed, summary, serde_json::Value::Null, Some(reason))
            }
            Err(DriverError::Cancelled) => {
                let pending = self.signal.take_pending();
                return Err(WorkflowInterrupt::user_escape(
                    pending.and_then(|p| p.reason),
                )
                .into());
            }
            Err(e) => {
                // Transport-level and provider failures mark the step failed;
                // the replanner decides what to do about it.
                warn!(step = %step.description, error = %e, "step execution failed");
                let message = e.to_string();
                (
                    StepOutcome::Failed,
                    format!("step failed: {}", message),
                    serde_json::Value::Null,
                    Some(message),
                )
            }
        };

        let produced_entity_ids = if outcome_kind == StepOutcome::Completed {
            self.ingest_results(&mut state, &step, &summary, &payload)
                .await?
        } else {
            Vec::new()
        };

        state.messages.push(Message::assistant(summary.clone()));
        let execution = StepExecution {
            seq_no: state.current_index(),
            description: step.description.clone(),
            started_at,
            ended_at: Utc::now(),
            outcome: outcome_kind,
            summary,
            produced_entity_ids,
            error,
        };
        state.record_step(execution.clone());
        announce_step(&self.ctx, &mut state, &execution);
        self.ctx.checkpoint(&state).await?;

        Ok((state, Next::Node(NODE_REPLANNER.to_string())))
    }
}

/// Decides whether to continue, revise the plan, or finish with a response.
pub struct ReplannerNode {
    pub ctx: Arc<EngineCtx>,
}

#[async_trait]
impl Node<WorkflowState> for ReplannerNode {
    fn id(&self) -> &str {
        NODE_REPLANNER
    }

    async fn run(&self, mut state: WorkflowState) -> Result<(WorkflowState, Next), EngineError> {
        if state.response.is_some() {
            return Ok((state, Next::End));
        }

        let request = ReplanRequest {
            instruction: state.input.clone(),
            plan: state.plan.clone(),
            plan_offset: state.plan_offset,
            past_steps: state.past_steps.clone(),
            modification_request: state.modification_request.take(),
            all_steps_done: state.all_steps_done(),
        };
        state.force_replan = false;

        match self.ctx.planner.replan(&request).await? {
            PlanDecision::Response(text) => {
                info!(thread = %state.thread_id, "workflow finalized");
                state.response = Some(text);
                self.ctx.bus.emit(
                    &state.thread_id,
                    Some(state.task_id.clone()),
                    &ObserverEvent::PlanUpdated {
                        plan: state.plan_view(),
                    },
                );
                self.ctx.checkpoint(&state).await?;
                Ok((state, Next::End))
            }
            PlanDecision::Plan(new_plan) => {
                if new_plan.is_empty() {
                    if request.all_steps_done {
                        state.response = Some("All steps completed.".to_string());
                        self.ctx.checkpoint(&state).await?;
                        return Ok((state, Next::End));
                    }
                    return Err(EngineError::InvalidState(
                        "planner returned an empty plan with steps remaining".to_string(),
                    ));
                }
                let total = state.plan_offset + new_plan.len();
                if total > self.ctx.limits.max_steps {
                    return Err(EngineError::PlanTooLarge {
                        got: total,
                        max: self.ctx.limits.max_steps,
                    });
                }

                if new_plan != state.plan {
                    let old: Vec<String> = state.plan.descriptions();
                    let new: Vec<String> = new_plan.descriptions();
                    let added: Vec<String> =
                        new.iter().filter(|s| !old.contains(s)).cloned().collect();
                    let dropped: Vec<String> =
                        old.iter().filter(|s| !new.contains(s)).cloned().collect();
                    state.plan = new_plan;
                    info!(
                        thread = %state.thread_id,
                        added = added.len(),
                        dropped = dropped.len(),
                        "plan revised"
                    );
                    self.ctx.bus.emit(
                        &state.thread_id,
                        Some(state.task_id.clone()),
                        &ObserverEvent::PlanReplanned {
                            plan: state.plan_view(),
                            added,
                            dropped,
                        },
                    );
                    self.ctx.bus.emit(
                        &state.thread_id,
                        Some(state.task_id.clone()),
                        &ObserverEvent::PlanUpdated {
                            plan: state.plan_view(),
                        },
                    );
                }
                self.ctx.checkpoint(&state).await?;
                Ok((state, Next::Node(NODE_EXECUTOR.to_string())))
            }
        }
    }
}
