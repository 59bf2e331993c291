//! Scripted planner and driver doubles.
//!
//! Deterministic stand-ins for the provider seams, used by unit tests and the
//! end-to-end scenarios. Decisions and outcomes pop from queues; when a queue
//! runs dry the defaults keep the engine moving (continue the plan, finalize
//! when everything executed, complete a step with an empty payload).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{
    AgentDriver, DriverError, DriverOutcome, DriverTask, PlanDecision, PlanRequest, Planner,
    PlannerError, ReplanRequest,
};
use crate::engine::Plan;

/// Planner double: scripted decisions, sensible defaults when the script ends.
#[derive(Default)]
pub struct ScriptedPlanner {
    plans: Mutex<VecDeque<PlanDecision>>,
    replans: Mutex<VecDeque<PlanDecision>>,
    plan_requests: Mutex<Vec<PlanRequest>>,
    replan_requests: Mutex<Vec<ReplanRequest>>,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shortcut: one initial plan from step descriptions, no scripted replans.
    pub fn with_plan<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let planner = Self::new();
        planner.push_plan(PlanDecision::Plan(Plan::from_descriptions(steps)));
        planner
    }

    pub fn push_plan(&self, decision: PlanDecision) {
        self.plans.lock().unwrap().push_back(decision);
    }

    pub fn push_replan(&self, decision: PlanDecision) {
        self.replans.lock().unwrap().push_back(decision);
    }

    /// Plan requests observed so far (assertion helper).
    pub fn plan_requests(&self) -> Vec<PlanRequest> {
        self.plan_requests.lock().unwrap().clone()
    }

    /// Replan requests observed so far (assertion helper).
    pub fn replan_requests(&self) -> Vec<ReplanRequest> {
        self.replan_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, req: &PlanRequest) -> Result<PlanDecision, PlannerError> {
        self.plan_requests.lock().unwrap().push(req.clone());
        match self.plans.lock().unwrap().pop_front() {
            Some(decision) => Ok(decision),
            None => Ok(PlanDecision::Plan(Plan::from_descriptions([req
                .instruction
                .clone()]))),
        }
    }

    async fn replan(&self, req: &ReplanRequest) -> Result<PlanDecision, PlannerError> {
        self.replan_requests.lock().unwrap().push(req.clone());
        if let Some(decision) = self.replans.lock().unwrap().pop_front() {
            return Ok(decision);
        }
        if req.all_steps_done {
            let summary = req
                .past_steps
                .iter()
                .map(|s| s.summary.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            Ok(PlanDecision::Response(if summary.is_empty() {
                "All steps completed.".to_string()
            } else {
                summary
            }))
        } else {
            Ok(PlanDecision::Plan(req.plan.clone()))
        }
    }
}

/// Driver double: scripted outcomes, records every composed task.
#[derive(Default)]
pub struct ScriptedDriver {
    outcomes: Mutex<VecDeque<Result<DriverOutcome, String>>>,
    tasks: Mutex<Vec<DriverTask>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shortcut: completes every step with the given payloads, in order.
    pub fn with_payloads<I>(payloads: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let driver = Self::new();
        for payload in payloads {
            driver.push_outcome(DriverOutcome::Completed {
                summary: payload.to_string(),
                payload,
            });
        }
        driver
    }

    pub fn push_outcome(&self, outcome: DriverOutcome) {
        self.outcomes.lock().unwrap().push_back(Ok(outcome));
    }

    /// Queue a provider failure for the next execution.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.outcomes.lock().unwrap().push_back(Err(message.into()));
    }

    /// Tasks the engine composed so far (assertion helper).
    pub fn tasks(&self) -> Vec<DriverTask> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentDriver for ScriptedDriver {
    async fn execute(
        &self,
        task: &DriverTask,
        cancel: &CancellationToken,
    ) -> Result<DriverOutcome, DriverError> {
        if cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        self.tasks.lock().unwrap().push(task.clone());
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(DriverError::Provider(message)),
            None => Ok(DriverOutcome::Completed {
                summary: format!("done: {}", task.step.description),
                payload: Value::Null,
            }),
        }
    }
}
