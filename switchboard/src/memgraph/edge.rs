//! Typed directed edges between memory nodes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Edge semantics. `RelatesTo` is symmetric in meaning and may form cycles;
/// the rest are causal/structural and keep the graph a DAG in practice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    LedTo,
    RelatesTo,
    DependsOn,
    Contradicts,
    Refines,
    Answers,
}

impl EdgeType {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::LedTo => "led_to",
            EdgeType::RelatesTo => "relates_to",
            EdgeType::DependsOn => "depends_on",
            EdgeType::Contradicts => "contradicts",
            EdgeType::Refines => "refines",
            EdgeType::Answers => "answers",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "led_to" => Some(EdgeType::LedTo),
            "relates_to" => Some(EdgeType::RelatesTo),
            "depends_on" => Some(EdgeType::DependsOn),
            "contradicts" => Some(EdgeType::Contradicts),
            "refines" => Some(EdgeType::Refines),
            "answers" => Some(EdgeType::Answers),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One directed, typed, weighted edge. Strength stays in [0, 1].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEdge {
    pub from: Uuid,
    pub to: Uuid,
    pub edge_type: EdgeType,
    pub strength: f64,
}
