//! Minimal state graph: named nodes, linear edges, explicit jumps.
//!
//! The workflow needs exactly one shape — planner → executor → replanner with a
//! loop back — so this keeps the state-in/state-out node contract and `Next`
//! routing, compiled once and reused for every run and resume.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::EngineError;

/// Sentinel for graph entry: `add_edge(START, first_node_id)`.
pub const START: &str = "__start__";

/// Sentinel for graph exit: `add_edge(last_node_id, END)`.
pub const END: &str = "__end__";

/// Routing decision a node returns alongside its new state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Next {
    /// Follow the linear edge out of this node.
    Continue,
    /// Jump to the named node.
    Node(String),
    /// Stop the run.
    End,
}

/// One step in the graph: state in, (state out, routing) out.
///
/// A node that raises [`EngineError::Interrupted`] must do so before mutating
/// anything the caller could observe; the runner discards its state copy.
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: Clone + Send + Sync + Debug + 'static,
{
    fn id(&self) -> &str;

    async fn run(&self, state: S) -> Result<(S, Next), EngineError>;
}

/// Builder: add nodes and edges, then compile.
pub struct StateGraph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: Vec<(String, String)>,
}

impl<S> Default for StateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> StateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: Arc<dyn Node<S>>) -> &mut Self {
        self.nodes.insert(node.id().to_string(), node);
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Validates that every edge endpoint exists and exactly one edge leaves
    /// START, then freezes the graph.
    pub fn compile(self) -> Result<CompiledGraph<S>, EngineError> {
        for (from, to) in &self.edges {
            if from != START && !self.nodes.contains_key(from) {
                return Err(EngineError::InvalidState(format!("unknown edge source {}", from)));
            }
            if to != END && !self.nodes.contains_key(to) {
                return Err(EngineError::InvalidState(format!("unknown edge target {}", to)));
            }
        }
        let mut starts = self.edges.iter().filter(|(f, _)| f == START);
        let first = match (starts.next(), starts.next()) {
            (Some((_, to)), None) => to.clone(),
            (None, _) => {
                return Err(EngineError::InvalidState("no edge from START".to_string()))
            }
            (Some(_), Some(_)) => {
                return Err(EngineError::InvalidState(
                    "multiple edges from START".to_string(),
                ))
            }
        };
        let linear: HashMap<String, String> = self
            .edges
            .iter()
            .filter(|(f, _)| f != START)
            .map(|(f, t)| (f.clone(), t.clone()))
            .collect();
        Ok(CompiledGraph {
            nodes: self.nodes,
            first,
            linear,
        })
    }
}

/// Immutable, runnable graph.
pub struct CompiledGraph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    first: String,
    linear: HashMap<String, String>,
}

impl<S> CompiledGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub fn first_node(&self) -> &str {
        &self.first
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Runs from `start_at` (or the START edge) until a node ends the run.
    /// On error the state holds the last committed value — a failing node's
    /// output is discarded.
    pub async fn run(&self, state: &mut S, start_at: Option<&str>) -> Result<(), EngineError> {
        let mut current = match start_at {
            Some(id) if self.nodes.contains_key(id) => id.to_string(),
            Some(id) => {
                return Err(EngineError::InvalidState(format!("unknown start node {}", id)))
            }
            None => self.first.clone(),
        };

        loop {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| EngineError::InvalidState(format!("unknown node {}", current)))?
                .clone();
            tracing::debug!(node = %current, "engine node start");
            let (new_state, next) = node.run(state.clone()).await?;
            *state = new_state;
            tracing::debug!(node = %current, next = ?next, "engine node done");

            current = match next {
                Next::End => return Ok(()),
                Next::Node(id) => {
                    if id == END {
                        return Ok(());
                    }
                    if !self.nodes.contains_key(&id) {
                        return Err(EngineError::InvalidState(format!("jump to unknown node {}", id)));
                    }
                    id
                }
                Next::Continue => match self.linear.get(&current) {
                    Some(to) if to == END => return Ok(()),
                    Some(to) => to.clone(),
                    None => return Ok(()),
                },
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct AddNode {
        id: &'static str,
        delta: i32,
        next: Next,
    }

    #[async_trait]
    impl Node<i32> for AddNode {
        fn id(&self) -> &str {
            self.id
        }
        async fn run(&self, state: i32) -> Result<(i32, Next), EngineError> {
            Ok((state + self.delta, self.next.clone()))
        }
    }

    fn add(id: &'static str, delta: i32, next: Next) -> Arc<dyn Node<i32>> {
        Arc::new(AddNode { id, delta, next })
    }

    /// **Scenario**: Linear chain runs in edge order and stops at END.
    #[tokio::test]
    async fn linear_chain_runs_in_order() {
        let mut graph = StateGraph::<i32>::new();
        graph.add_node(add("a", 1, Next::Continue));
        graph.add_node(add("b", 2, Next::Continue));
        graph.add_edge(START, "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", END);
        let compiled = graph.compile().unwrap();
        let mut state = 0;
        compiled.run(&mut state, None).await.unwrap();
        assert_eq!(state, 3);
    }

    /// **Scenario**: Next::Node jumps over the linear order.
    #[tokio::test]
    async fn jump_skips_linear_order() {
        let mut graph = StateGraph::<i32>::new();
        graph.add_node(add("a", 1, Next::Node("c".into())));
        graph.add_node(add("b", 10, Next::Continue));
        graph.add_node(add("c", 100, Next::End));
        graph.add_edge(START, "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        let compiled = graph.compile().unwrap();
        let mut state = 0;
        compiled.run(&mut state, None).await.unwrap();
        assert_eq!(state, 101, "b skipped by the jump");
    }

    /// **Scenario**: start_at resumes from a named node (the resume path).
    #[tokio::test]
    async fn start_at_resumes_mid_graph() {
        let mut graph = StateGraph::<i32>::new();
        graph.add_node(add("a", 1, Next::Continue));
        graph.add_node(add("b", 2, Next::End));
        graph.add_edge(START, "a");
        graph.add_edge("a", "b");
        let compiled = graph.compile().unwrap();
        let mut state = 0;
        compiled.run(&mut state, Some("b")).await.unwrap();
        assert_eq!(state, 2, "node a never ran");
    }

    /// **Scenario**: A failing node leaves the caller's state at the last committed value.
    #[tokio::test]
    async fn error_discards_failed_node_output() {
        struct FailNode;
        #[async_trait]
        impl Node<i32> for FailNode {
            fn id(&self) -> &str {
                "fail"
            }
            async fn run(&self, _state: i32) -> Result<(i32, Next), EngineError> {
                Err(EngineError::InvalidState("boom".into()))
            }
        }
        let mut graph = StateGraph::<i32>::new();
        graph.add_node(add("a", 5, Next::Continue));
        graph.add_node(Arc::new(FailNode));
        graph.add_edge(START, "a");
        graph.add_edge("a", "fail");
        let compiled = graph.compile().unwrap();
        let mut state = 0;
        let err = compiled.run(&mut state, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert_eq!(state, 5, "state from node a survives");
    }

    /// **Scenario**: Compile rejects unknown edges and a missing START edge.
    #[test]
    fn compile_validations() {
        let mut graph = StateGraph::<i32>::new();
        graph.add_node(add("a", 1, Next::Continue));
        graph.add_edge(START, "ghost");
        assert!(graph.compile().is_err());

        let graph2 = StateGraph::<i32>::new();
        assert!(graph2.compile().is_err(), "no START edge");
    }
}
