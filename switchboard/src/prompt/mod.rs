//! Deterministic prompt assembly.
//!
//! Data-driven templates for the three planner calls plus the memory-context
//! shaping the executor hands to the driver. No model-specific phrasing leaks
//! out of this module, and rendering the same inputs always yields the same
//! text.

mod trim;

pub use trim::{estimate_tokens, trim_messages};

use std::fmt::Write as _;

use crate::memgraph::ScoredNode;
use crate::planner::{DriverTask, PlanRequest, ReplanRequest};

pub const PLAN_SYSTEM: &str = "You are an orchestrator that plans short, ordered step lists \
for other agents to execute. Answer with a JSON array of steps. Each step is either a string \
or an object with `description` and optional `agent` / `tool` hints. Use only capabilities \
from the catalog; prefer fewer steps.";

pub const REPLAN_SYSTEM: &str = "You revise a running plan. Answer with one JSON object: \
either {\"action\": \"respond\", \"response\": \"...\"} when the objective is met, or \
{\"action\": \"plan\", \"steps\": [...]} with the remaining steps. Never restate steps that \
already executed.";

pub const EXECUTE_SYSTEM: &str = "You execute exactly one step of a larger plan, using the \
provided context. Answer with the step result; include a JSON object with the raw data when \
you have one.";

/// Plan prompt: instruction + capability catalog + memory digest.
pub fn render_plan_prompt(req: &PlanRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Objective: {}", req.instruction);
    out.push_str("\nAvailable capabilities:\n");
    if req.capabilities.is_empty() {
        out.push_str("- (none registered)\n");
    }
    for (capability, agents) in &req.capabilities {
        let _ = writeln!(out, "- {} (agents: {})", capability, agents.join(", "));
    }
    if !req.memory_digest.is_empty() {
        out.push_str("\nWhat we already know:\n");
        out.push_str(&req.memory_digest);
        out.push('\n');
    }
    out.push_str("\nProduce the plan now.");
    out
}

/// Replan prompt: pending plan, executed steps with summaries, and the user's
/// modification request verbatim when a forced replan carries one.
pub fn render_replan_prompt(req: &ReplanRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Objective: {}", req.instruction);

    out.push_str("\nSteps already executed:\n");
    if req.past_steps.is_empty() {
        out.push_str("- (none)\n");
    }
    for step in &req.past_steps {
        let _ = writeln!(
            out,
            "- [{}] {} -> {}",
            step.outcome_str(),
            step.description,
            step.summary
        );
    }

    out.push_str("\nRemaining plan:\n");
    if req.plan.steps.is_empty() {
        out.push_str("- (none)\n");
    }
    for (i, step) in req.plan.steps.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", req.plan_offset + i, step.description);
    }

    if let Some(request) = &req.modification_request {
        let _ = writeln!(out, "\nUser modification request: {}", request);
    }
    if req.all_steps_done {
        out.push_str("\nEvery step has executed. Summarize and finalize.");
    } else {
        out.push_str("\nDecide: continue with a (possibly revised) remaining plan, or respond.");
    }
    out
}

/// Execute-task prompt: one step plus its shaped context.
pub fn render_task_prompt(task: &DriverTask) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Original request: {}", task.instruction);
    let _ = writeln!(out, "Current step: {}", task.step.description);
    if let Some(agent) = &task.step.hinted_agent {
        let _ = writeln!(out, "Suggested agent: {}", agent);
    }
    if let Some(previous) = &task.previous_outcome {
        let _ = writeln!(out, "Previous step outcome: {}", previous);
    }
    if !task.memory_context.is_empty() {
        out.push_str("\nRelevant memory:\n");
        out.push_str(&task.memory_context);
        out.push('\n');
    }
    out.push_str("\nExecute the step.");
    out
}

/// Memory context for the driver: compact summaries for every hit, full JSON
/// content only for the top `full_content_top` (the rest stay cheap).
pub fn render_memory_context(hits: &[ScoredNode], full_content_top: usize) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        let _ = writeln!(out, "- {} (score {:.2})", hit.node.summary, hit.score);
        if i < full_content_top && !hit.node.content.is_null() {
            let _ = writeln!(out, "  content: {}", hit.node.content);
        }
    }
    out
}

/// Memory digest for planning prompts: top important memories plus topic
/// cluster headlines.
pub fn memory_digest(important: &[ScoredNode], cluster_headlines: &[String]) -> String {
    let mut out = String::new();
    for hit in important {
        let _ = writeln!(out, "- {}", hit.node.summary);
    }
    if !cluster_headlines.is_empty() {
        let _ = writeln!(out, "Topics: {}", cluster_headlines.join("; "));
    }
    out
}
