//! # Plan-and-execute engine
//!
//! A four-node state machine over [`WorkflowState`]: the planner produces a
//! short ordered plan, the executor drives one step at a time through the
//! agent driver (memory retrieval in, entity extraction and `LedTo` edges
//! out), and the replanner decides continue / revise / finish after every
//! step. Interrupts — user escape and agent questions — surface through the
//! error channel, checkpoint first, and resume via [`ResumeCommand`].
//!
//! A step's effects are complete only once its checkpoint lands; crash
//! recovery replays from the last checkpoint and suppresses duplicate
//! completed events via the announced-step set.

mod ctx;
mod error;
mod graph;
mod nodes;
mod state;
mod thread;

pub use ctx::{EngineCtx, EngineLimits, InterruptSignal};
pub use error::{EngineError, WorkflowInterrupt};
pub use graph::{CompiledGraph, Next, Node, StateGraph, END, START};
pub use nodes::{ExecutorNode, PlannerNode, ReplannerNode};
pub use state::{
    PendingInterrupt, Plan, ResumeCommand, Step, StepExecution, WorkflowState,
};
pub use thread::{TaskResult, TaskStatus, ThreadEngine, ThreadManager, ThreadStatus};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use wire_event::InterruptKind;

    use super::*;
    use crate::checkpoint::{ns, CheckpointStore, MemoryCheckpointStore};
    use crate::extract::PatternExtractor;
    use crate::memgraph::{GraphConfig, MemoryKind, MemoryService, RetrievalQuery};
    use crate::observer::ObserverBus;
    use crate::planner::{DriverOutcome, PlanDecision, ScriptedDriver, ScriptedPlanner};
    use crate::registry::AgentRegistry;

    const CRM_RULES: &str = r#"
- pattern: "\\b(001[a-zA-Z0-9]{12,15})\\b"
  entity_type: account
  entity_system: sf
  tags: [crm]
"#;

    struct Fixture {
        planner: Arc<ScriptedPlanner>,
        driver: Arc<ScriptedDriver>,
        bus: Arc<ObserverBus>,
        checkpoints: Arc<MemoryCheckpointStore>,
        memory: Arc<MemoryService>,
        ctx: Arc<EngineCtx>,
    }

    fn fixture() -> Fixture {
        let planner = Arc::new(ScriptedPlanner::new());
        let driver = Arc::new(ScriptedDriver::new());
        let bus = Arc::new(ObserverBus::default());
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let memory = Arc::new(
            MemoryService::new(GraphConfig::default())
                .with_entity_store(checkpoints.clone() as Arc<dyn crate::checkpoint::EntityStore>),
        );
        let ctx = Arc::new(EngineCtx {
            planner: planner.clone(),
            driver: driver.clone(),
            memory: memory.clone(),
            extractor: Arc::new(PatternExtractor::from_yaml_str(CRM_RULES).unwrap()),
            bus: bus.clone(),
            checkpoints: checkpoints.clone(),
            registry: Arc::new(AgentRegistry::new()),
            limits: EngineLimits::default(),
        });
        Fixture {
            planner,
            driver,
            bus,
            checkpoints,
            memory,
            ctx,
        }
    }

    fn engine(fx: &Fixture, thread: &str) -> ThreadEngine {
        ThreadEngine::new(thread, "u1", fx.ctx.clone()).unwrap()
    }

    /// **Scenario**: Spec §8 happy path — one-step plan, mocked CRM payload,
    /// extractor stores the DomainEntity, final response present, completed=[0].
    #[tokio::test]
    async fn happy_path_one_step() {
        let fx = fixture();
        fx.planner.push_plan(PlanDecision::Plan(Plan::from_descriptions([
            "Look up the account 'GenePoint' on the CRM",
        ])));
        fx.driver.push_outcome(DriverOutcome::Completed {
            summary: "Found GenePoint (001bm00000SA8pSAAT)".into(),
            payload: json!({"id": "001bm00000SA8pSAAT", "Name": "GenePoint"}),
        });

        let engine = engine(&fx, "t1");
        let result = engine.run_task("task-1", "get the GenePoint account").await.unwrap();

        assert_eq!(result.status, TaskStatus::Completed);
        let response = result.response.unwrap();
        assert!(response.contains("GenePoint"), "{}", response);
        assert!(response.contains("001bm00000SA8pSAAT"), "{}", response);
        assert_eq!(result.plan.completed, vec![0]);
        assert!(result.plan.failed.is_empty());

        // the extractor stored exactly one DomainEntity for (id, sf)
        let graph = fx.memory.graph_for("u1").await.unwrap();
        let hits = graph
            .retrieve(
                &RetrievalQuery::new("account GenePoint")
                    .with_kinds(vec![MemoryKind::DomainEntity]),
                chrono::Utc::now(),
            )
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.entity_id.as_deref(), Some("001bm00000SA8pSAAT"));
        assert_eq!(hits[0].node.entity_system.as_deref(), Some("sf"));
    }

    /// **Scenario**: Spec §8 two-step plan with replan — step 1 yields three
    /// candidates, the replanner inserts a clarification; planOffset becomes 1,
    /// the pending plan has 3 steps, and TaskCompleted fired exactly once for step 0.
    #[tokio::test]
    async fn two_step_plan_with_replan() {
        let fx = fixture();
        let mut events = fx.bus.subscribe("t2");

        fx.planner.push_plan(PlanDecision::Plan(Plan::from_descriptions([
            "Find the Express Logistics account",
            "Create a Jira bug for its last opportunity",
        ])));
        fx.driver.push_outcome(DriverOutcome::Completed {
            summary: "three candidate accounts".into(),
            payload: json!({"accounts": [
                {"id": "001bm00000SA8pSAAT", "Name": "Express Logistics SLA"},
                {"id": "001bm00000SA8pTAAT", "Name": "Express Logistics Portal"},
                {"id": "001bm00000SA8pUAAT", "Name": "Express Logistics and Transport"},
            ]}),
        });
        // replanner inserts a clarification step in front of the remaining work
        fx.planner.push_replan(PlanDecision::Plan(Plan::from_descriptions([
            "Ask which Express Logistics account is meant",
            "Find its last opportunity",
            "Create a Jira bug for that opportunity",
        ])));
        // the three remaining steps complete, then the default replan finalizes
        for _ in 0..3 {
            fx.driver.push_outcome(DriverOutcome::Completed {
                summary: "ok".into(),
                payload: json!(null),
            });
        }

        let engine = engine(&fx, "t2");
        let result = engine
            .run_task(
                "task-2",
                "Find express logistics and create a Jira bug for its last opportunity",
            )
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::Completed);

        // three DomainEntity nodes from step 1
        let graph = fx.memory.graph_for("u1").await.unwrap();
        let entities = graph
            .retrieve(
                &RetrievalQuery::new("Express Logistics")
                    .with_kinds(vec![MemoryKind::DomainEntity])
                    .with_limit(10),
                chrono::Utc::now(),
            )
            .await;
        assert_eq!(entities.len(), 3);

        // after the replan the checkpoint recorded plan_offset 1 with 3 pending steps
        let mut saw_replanned_offset = false;
        let mut completed_step0 = 0;
        while let Ok(frame) = events.try_recv() {
            if frame.kind == "plan_replanned" {
                let steps = frame.payload["plan"]["steps"].as_array().unwrap();
                assert_eq!(steps.len(), 4, "1 executed + 3 pending");
                assert_eq!(frame.payload["plan"]["current"], 1);
                saw_replanned_offset = true;
            }
            if frame.kind == "task_completed" && frame.payload["index"] == 0 {
                completed_step0 += 1;
            }
        }
        assert!(saw_replanned_offset, "PlanReplanned seen with stable indices");
        assert_eq!(completed_step0, 1, "TaskCompleted exactly once for step 0");
    }

    /// Driver for the escape scenario: step one completes, step two blocks on
    /// the cancellation token (the user escape fires it), later steps complete.
    struct EscapeOnSecondCall {
        calls: std::sync::atomic::AtomicUsize,
        in_second: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl crate::planner::AgentDriver for EscapeOnSecondCall {
        async fn execute(
            &self,
            task: &crate::planner::DriverTask,
            cancel: &tokio_util::sync::CancellationToken,
        ) -> Result<DriverOutcome, crate::planner::DriverError> {
            let n = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            match n {
                0 => Ok(DriverOutcome::Completed {
                    summary: "step one done".into(),
                    payload: json!(null),
                }),
                1 => {
                    self.in_second.notify_one();
                    cancel.cancelled().await;
                    Err(crate::planner::DriverError::Cancelled)
                }
                _ => Ok(DriverOutcome::Completed {
                    summary: format!("done: {}", task.step.description),
                    payload: json!(null),
                }),
            }
        }
    }

    /// **Scenario**: Spec §8 user escape — the escape arrives while step two's
    /// RPC is in flight and uncommitted, so the call cancels, the engine emits
    /// Interrupt(user_escape), and a forced resume replans around the remaining
    /// work. Event sequence numbers stay strictly monotonic across the interrupt.
    #[tokio::test]
    async fn user_escape_and_forced_resume() {
        let fx = fixture();
        let mut events = fx.bus.subscribe("t3");

        fx.planner.push_plan(PlanDecision::Plan(Plan::from_descriptions([
            "step one",
            "step two",
            "step three",
        ])));
        // replan 1 (after step one): keep going unchanged; replan 2 (forced
        // resume): drop step two.
        fx.planner.push_replan(PlanDecision::Plan(Plan::from_descriptions([
            "step two",
            "step three",
        ])));
        fx.planner.push_replan(PlanDecision::Plan(Plan::from_descriptions([
            "step three",
        ])));

        let in_second = Arc::new(tokio::sync::Notify::new());
        let driver = Arc::new(EscapeOnSecondCall {
            calls: std::sync::atomic::AtomicUsize::new(0),
            in_second: in_second.clone(),
        });
        let ctx = Arc::new(EngineCtx {
            planner: fx.planner.clone(),
            driver,
            memory: fx.memory.clone(),
            extractor: Arc::new(PatternExtractor::empty()),
            bus: fx.bus.clone(),
            checkpoints: fx.checkpoints.clone(),
            registry: Arc::new(AgentRegistry::new()),
            limits: EngineLimits::default(),
        });
        let engine = Arc::new(ThreadEngine::new("t3", "u1", ctx).unwrap());

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_task("task-3", "long task").await })
        };
        in_second.notified().await;
        engine.request_escape(Some("user pressed escape".into()));
        let result = runner.await.unwrap().unwrap();

        assert_eq!(result.status, TaskStatus::Interrupted);
        let interrupt = result.interrupt.unwrap();
        assert_eq!(interrupt.kind, InterruptKind::UserEscape);
        assert_eq!(interrupt.reason.as_deref(), Some("user pressed escape"));

        let resumed = engine
            .resume(ResumeCommand {
                input: "skip step 2".into(),
                force_replan: true,
            })
            .await
            .unwrap();
        assert_eq!(resumed.status, TaskStatus::Completed);
        let steps: Vec<String> = resumed.plan.steps;
        assert!(steps.iter().any(|s| s == "step three"));
        assert!(!steps.iter().any(|s| s == "step two"), "step two dropped");

        // invariant 2: seq strictly monotonic across the interrupt
        let mut last_seq = 0;
        let mut saw_interrupt = false;
        let mut saw_resume = false;
        while let Ok(frame) = events.try_recv() {
            assert!(frame.seq > last_seq, "seq went backwards at {}", frame.kind);
            last_seq = frame.seq;
            saw_interrupt |= frame.kind == "interrupt";
            saw_resume |= frame.kind == "interrupt_resume";
        }
        assert!(saw_interrupt && saw_resume);

        // the modification request reached the replanner verbatim
        let replans = fx.planner.replan_requests();
        assert!(replans
            .iter()
            .any(|r| r.modification_request.as_deref() == Some("skip step 2")));
    }

    /// **Scenario**: A human_input question from the driver pauses the workflow;
    /// resume with the answer re-executes the step with the answer in the window.
    #[tokio::test]
    async fn human_input_question_and_answer() {
        let fx = fixture();
        fx.planner.push_plan(PlanDecision::Plan(Plan::from_descriptions([
            "create the bug",
        ])));
        fx.driver.push_outcome(DriverOutcome::NeedsInput {
            question: "which project?".into(),
        });
        fx.driver.push_outcome(DriverOutcome::Completed {
            summary: "bug created in PROJ".into(),
            payload: json!(null),
        });

        let engine = engine(&fx, "t4");
        let paused = engine.run_task("task-4", "file a bug").await.unwrap();
        assert_eq!(paused.status, TaskStatus::Interrupted);
        assert_eq!(
            paused.interrupt.unwrap().question.as_deref(),
            Some("which project?")
        );

        let done = engine
            .resume(ResumeCommand {
                input: "PROJ".into(),
                force_replan: false,
            })
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);

        // the answer reached the driver's conversation window
        let tasks = fx.driver.tasks();
        let last = tasks.last().unwrap();
        assert!(last
            .messages
            .iter()
            .any(|m| m.text() == "PROJ"));
    }

    /// **Scenario**: Spec property 4 — consecutive completed steps are linked by
    /// a LedTo edge between their CompletedAction nodes.
    #[tokio::test]
    async fn consecutive_steps_linked_by_led_to() {
        let fx = fixture();
        fx.planner.push_plan(PlanDecision::Plan(Plan::from_descriptions([
            "first",
            "second",
        ])));

        let engine = engine(&fx, "t5");
        engine.run_task("task-5", "two step job").await.unwrap();

        let graph = fx.memory.graph_for("u1").await.unwrap();
        let actions = graph
            .retrieve(
                &RetrievalQuery::new("Completed")
                    .with_kinds(vec![MemoryKind::CompletedAction])
                    .with_limit(10),
                chrono::Utc::now(),
            )
            .await;
        assert_eq!(actions.len(), 2);
        let edges = graph.edges().await;
        let led_to: Vec<_> = edges
            .iter()
            .filter(|e| e.edge_type == crate::memgraph::EdgeType::LedTo)
            .collect();
        assert_eq!(led_to.len(), 1, "one LedTo edge between the two actions");
    }

    /// **Scenario**: A failed step flows into the replanner rather than aborting;
    /// the final view marks it failed and the workflow still finishes.
    #[tokio::test]
    async fn failed_step_reaches_replanner() {
        let fx = fixture();
        fx.planner.push_plan(PlanDecision::Plan(Plan::from_descriptions([
            "flaky step",
        ])));
        fx.driver.push_failure("upstream exploded");

        let engine = engine(&fx, "t6");
        let result = engine.run_task("task-6", "try the flaky thing").await.unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.plan.failed, vec![0]);
        assert!(result.plan.completed.is_empty());
    }

    /// **Scenario**: A plan over the step bound is rejected outright.
    #[tokio::test]
    async fn oversized_plan_rejected() {
        let fx = fixture();
        let steps: Vec<String> = (0..101).map(|i| format!("step {}", i)).collect();
        fx.planner
            .push_plan(PlanDecision::Plan(Plan::from_descriptions(steps)));

        let engine = engine(&fx, "t7");
        let err = engine.run_task("task-7", "huge job").await.unwrap_err();
        assert!(matches!(err, EngineError::PlanTooLarge { got: 101, max: 100 }));
    }

    /// **Scenario**: Spec property 6 — a checkpoint taken after a step means
    /// recovery does not re-execute it; a crash before means it runs again.
    #[tokio::test]
    async fn crash_recovery_replays_from_checkpoint() {
        let fx = fixture();
        fx.planner.push_plan(PlanDecision::Plan(Plan::from_descriptions([
            "step one",
            "step two",
        ])));
        fx.driver.push_outcome(DriverOutcome::Completed {
            summary: "one done".into(),
            payload: json!(null),
        });
        fx.driver.push_outcome(DriverOutcome::Completed {
            summary: "two done".into(),
            payload: json!(null),
        });

        let engine1 = engine(&fx, "t8");
        engine1.run_task("task-8", "two steps").await.unwrap();

        // count driver calls so far, then "crash" and recover a fresh engine
        let calls_before = fx.driver.tasks().len();
        assert_eq!(calls_before, 2);

        let engine2 = engine(&fx, "t8");
        let recovered = engine2.recover().await.unwrap().unwrap();
        assert_eq!(recovered.status, TaskStatus::Completed);
        assert_eq!(
            fx.driver.tasks().len(),
            calls_before,
            "completed steps never re-execute after their checkpoint"
        );

        // now simulate a crash before the first checkpoint: seed a checkpoint
        // with a pending plan and no past steps, then recover.
        let mut state = WorkflowState::new("t9", "task-9", "u1", "redo");
        state.plan = Plan::from_descriptions(["only step"]);
        fx.ctx.checkpoint(&state).await.unwrap();
        fx.driver.push_outcome(DriverOutcome::Completed {
            summary: "redone".into(),
            payload: json!(null),
        });
        let engine3 = engine(&fx, "t9");
        let redone = engine3.recover().await.unwrap().unwrap();
        assert_eq!(redone.status, TaskStatus::Completed);
        assert_eq!(fx.driver.tasks().len(), calls_before + 1, "in-flight step re-executed");
    }

    /// **Scenario**: Checkpoints land in both documented namespaces.
    #[tokio::test]
    async fn checkpoint_layout() {
        let fx = fixture();
        fx.planner
            .push_plan(PlanDecision::Plan(Plan::from_descriptions(["a"])));
        let engine = engine(&fx, "t10");
        engine.run_task("task-10", "layout check").await.unwrap();

        let by_task = fx
            .checkpoints
            .get(&ns::workflow_instances(), "task-10")
            .await
            .unwrap();
        assert!(by_task.is_some());
        let by_thread = fx
            .checkpoints
            .get(&ns::memory("u1"), &ns::thread_state_key("t10"))
            .await
            .unwrap();
        assert!(by_thread.is_some());
        assert_eq!(by_task.unwrap()["response"], by_thread.unwrap()["response"]);
    }

    /// **Scenario**: Idle threads are collected after the TTL; active ones stay.
    #[tokio::test]
    async fn idle_gc_collects_done_threads() {
        let fx = fixture();
        fx.planner
            .push_plan(PlanDecision::Plan(Plan::from_descriptions(["a"])));
        let manager = Arc::new(ThreadManager::new(fx.ctx.clone(), Duration::from_millis(10)));
        let engine = manager.engine_for(Some("t11"), "u1").unwrap();
        engine.run_task("task-11", "quick").await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let removed = manager.gc_once(chrono::Utc::now()).await;
        assert_eq!(removed, 1);
        assert!(manager.get("t11").is_none());
    }

    /// **Scenario**: A closed manager refuses new engines.
    #[tokio::test]
    async fn closed_manager_refuses_threads() {
        let fx = fixture();
        let manager = ThreadManager::new(fx.ctx.clone(), Duration::from_secs(3600));
        manager.close();
        assert!(manager.engine_for(Some("t"), "u").is_err());
    }
}
