//! Engine error types. An interrupt travels through the error channel: nodes
//! raise it, the thread engine checkpoints and surfaces it to the caller.

use thiserror::Error;
use wire_event::InterruptKind;

use crate::checkpoint::CheckpointError;
use crate::memgraph::GraphError;
use crate::planner::{DriverError, PlannerError};

/// A raised interrupt. Nodes must not mutate state before raising one — the
/// thread engine persists the pre-step state, so resume re-enters cleanly.
#[derive(Debug, Clone, Error)]
#[error("workflow interrupted ({kind:?})")]
pub struct WorkflowInterrupt {
    pub kind: InterruptKind,
    pub reason: Option<String>,
    pub question: Option<String>,
}

impl WorkflowInterrupt {
    pub fn user_escape(reason: Option<String>) -> Self {
        Self {
            kind: InterruptKind::UserEscape,
            reason,
            question: None,
        }
    }

    pub fn human_input(question: impl Into<String>) -> Self {
        Self {
            kind: InterruptKind::HumanInput,
            reason: None,
            question: Some(question.into()),
        }
    }
}

/// Engine execution error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("planner: {0}")]
    Planner(#[from] PlannerError),

    #[error("driver: {0}")]
    Driver(#[from] DriverError),

    /// Execution paused for an interrupt; not a failure.
    #[error(transparent)]
    Interrupted(#[from] WorkflowInterrupt),

    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("memory: {0}")]
    Memory(#[from] GraphError),

    /// A plan exceeding the step bound is rejected outright.
    #[error("plan too large: {got} steps (max {max})")]
    PlanTooLarge { got: usize, max: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl EngineError {
    /// True when the error is the interrupt control-flow path.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, EngineError::Interrupted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Interrupt constructors carry kind-appropriate payloads.
    #[test]
    fn interrupt_constructors() {
        let escape = WorkflowInterrupt::user_escape(Some("user pressed escape".into()));
        assert_eq!(escape.kind, InterruptKind::UserEscape);
        assert!(escape.question.is_none());

        let question = WorkflowInterrupt::human_input("which account?");
        assert_eq!(question.kind, InterruptKind::HumanInput);
        assert_eq!(question.question.as_deref(), Some("which account?"));
    }

    /// **Scenario**: Only the Interrupted variant is interrupt control flow.
    #[test]
    fn is_interrupt_discriminates() {
        assert!(EngineError::from(WorkflowInterrupt::human_input("q")).is_interrupt());
        assert!(!EngineError::InvalidState("bad".into()).is_interrupt());
        assert!(!EngineError::PlanTooLarge { got: 200, max: 100 }.is_interrupt());
    }
}
