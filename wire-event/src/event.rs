//! Observer event kinds (type + payload).
//!
//! Tagged union of everything the engine reports while driving a workflow.
//! Memory node events carry the **full** node snapshot; UIs rebuild their
//! graph view from these and a truncated payload breaks them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one executed plan step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Failed,
    Skipped,
}

/// Interrupt origin: user pressed escape, or an agent asked a question.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    UserEscape,
    HumanInput,
}

/// Plan snapshot for UI consumers: step texts plus completed/failed/current indices.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanView {
    pub steps: Vec<String>,
    pub completed: Vec<usize>,
    pub failed: Vec<usize>,
    pub current: Option<usize>,
}

/// One observer event: wire shape is `{"type": <kind>, ...payload}`.
/// The envelope (ts, seq, thread/task ids) is applied separately, see [`crate::envelope`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEvent {
    PlanCreated {
        task_id: String,
        steps: Vec<String>,
    },
    TaskStarted {
        task_id: String,
        index: usize,
        description: String,
    },
    TaskCompleted {
        task_id: String,
        index: usize,
        summary: String,
        outcome: StepOutcome,
    },
    PlanUpdated {
        plan: PlanView,
    },
    PlanReplanned {
        plan: PlanView,
        /// Steps present in the new plan but not the previous one.
        added: Vec<String>,
        /// Pending steps of the previous plan that the new plan dropped.
        dropped: Vec<String>,
    },
    /// Full node snapshot, content included.
    MemoryNodeAdded {
        node: Value,
    },
    MemoryEdgeAdded {
        from: String,
        to: String,
        edge_type: String,
        strength: f64,
    },
    /// Compact snapshot for UI bootstrap on a fresh subscription.
    MemoryGraphSnapshot {
        snapshot: Value,
    },
    Interrupt {
        kind: InterruptKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        question: Option<String>,
    },
    InterruptResume {
        payload: Value,
    },
}

impl ObserverEvent {
    /// Snake-case kind string, used as the SSE `event:` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlanCreated { .. } => "plan_created",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::PlanUpdated { .. } => "plan_updated",
            Self::PlanReplanned { .. } => "plan_replanned",
            Self::MemoryNodeAdded { .. } => "memory_node_added",
            Self::MemoryEdgeAdded { .. } => "memory_edge_added",
            Self::MemoryGraphSnapshot { .. } => "memory_graph_snapshot",
            Self::Interrupt { .. } => "interrupt",
            Self::InterruptResume { .. } => "interrupt_resume",
        }
    }

    /// Serializes the payload fields only (the `type` tag is stripped; the kind
    /// travels in the SSE `event:` line instead).
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("type");
        }
        Ok(value)
    }
}
