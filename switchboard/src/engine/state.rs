//! Workflow state: the single mutable value one thread's engine loops over.
//!
//! `plan` holds only pending steps. `plan_offset` is the global index of
//! `plan[0]`; executed steps move into `past_steps`, so `plan_offset` always
//! equals `past_steps.len()` and step indices stay stable across replans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wire_event::{InterruptKind, PlanView, StepOutcome};

use crate::codec::iso8601_millis;
use crate::message::Message;

/// One imperative plan step with optional routing hints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hinted_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hinted_tool: Option<String>,
}

impl Step {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            hinted_agent: None,
            hinted_tool: None,
        }
    }

    pub fn with_agent_hint(mut self, agent: impl Into<String>) -> Self {
        self.hinted_agent = Some(agent.into());
        self
    }

    pub fn with_tool_hint(mut self, tool: impl Into<String>) -> Self {
        self.hinted_tool = Some(tool.into());
        self
    }
}

/// Ordered pending steps. Immutable once created; the replanner swaps in a new
/// `Plan` rather than editing this one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn from_descriptions<I, S>(descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: descriptions.into_iter().map(Step::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.description.clone()).collect()
    }
}

/// Record of one executed (or skipped) step. Append-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepExecution {
    /// Global step index, stable across replans.
    pub seq_no: usize,
    pub description: String,
    #[serde(with = "iso8601_millis")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "iso8601_millis")]
    pub ended_at: DateTime<Utc>,
    pub outcome: StepOutcome,
    pub summary: String,
    pub produced_entity_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepExecution {
    pub fn outcome_str(&self) -> &'static str {
        match self.outcome {
            StepOutcome::Completed => "completed",
            StepOutcome::Failed => "failed",
            StepOutcome::Skipped => "skipped",
        }
    }
}

#[cfg(test)]
impl StepExecution {
    /// Test helper: a completed step record with fixed timestamps.
    pub fn test_completed(seq_no: usize, description: &str, summary: &str) -> Self {
        let now = Utc::now();
        Self {
            seq_no,
            description: description.to_string(),
            started_at: now,
            ended_at: now,
            outcome: StepOutcome::Completed,
            summary: summary.to_string(),
            produced_entity_ids: vec![],
            error: None,
        }
    }
}

/// An interrupt waiting for a resume command.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub kind: InterruptKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

/// The typed command that re-enters a paused workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResumeCommand {
    pub input: String,
    #[serde(default)]
    pub force_replan: bool,
}

/// Everything one engine needs to run, resume, and recover a task.
/// Mutated only by the engine; persisted at every node boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowState {
    pub thread_id: String,
    pub task_id: String,
    pub user_id: String,
    pub input: String,
    pub plan: Plan,
    pub plan_offset: usize,
    pub past_steps: Vec<StepExecution>,
    pub messages: Vec<Message>,
    pub response: Option<String>,
    pub interrupt: Option<PendingInterrupt>,
    pub force_replan: bool,
    pub modification_request: Option<String>,
    /// The previous step's `CompletedAction` memory node, for `LedTo` edges.
    pub last_action_node: Option<Uuid>,
    /// Step seq_nos whose `TaskCompleted` already went out (replay dedup).
    pub announced_steps: Vec<usize>,
}

impl WorkflowState {
    pub fn new(
        thread_id: impl Into<String>,
        task_id: impl Into<String>,
        user_id: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            task_id: task_id.into(),
            user_id: user_id.into(),
            input: input.into(),
            plan: Plan::default(),
            plan_offset: 0,
            past_steps: Vec::new(),
            messages: Vec::new(),
            response: None,
            interrupt: None,
            force_replan: false,
            modification_request: None,
            last_action_node: None,
            announced_steps: Vec::new(),
        }
    }

    /// The step the executor would run next.
    pub fn current_step(&self) -> Option<&Step> {
        self.plan.steps.first()
    }

    /// Global index of the current step.
    pub fn current_index(&self) -> usize {
        self.plan_offset
    }

    pub fn all_steps_done(&self) -> bool {
        self.plan.is_empty()
    }

    /// Moves the front pending step into `past_steps` and advances the offset.
    pub fn record_step(&mut self, execution: StepExecution) {
        if !self.plan.steps.is_empty() {
            self.plan.steps.remove(0);
        }
        self.plan_offset += 1;
        self.past_steps.push(execution);
    }

    /// Plan snapshot for events and RPC responses. Skipped steps count toward
    /// `failed` so completed + failed always cover every recorded index.
    pub fn plan_view(&self) -> PlanView {
        let mut steps: Vec<String> = self.past_steps.iter().map(|s| s.description.clone()).collect();
        steps.extend(self.plan.descriptions());

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        for step in &self.past_steps {
            match step.outcome {
                StepOutcome::Completed => completed.push(step.seq_no),
                StepOutcome::Failed | StepOutcome::Skipped => failed.push(step.seq_no),
            }
        }
        PlanView {
            steps,
            completed,
            failed,
            current: if self.plan.is_empty() {
                None
            } else {
                Some(self.plan_offset)
            },
        }
    }
}
