//! Memory node types and the dedup merge rule.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::codec::iso8601_millis;

/// Kind of a memory node. `DomainEntity` nodes are persistent across threads
/// for the same user; all other kinds are per-thread and subject to decay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    SearchResult,
    UserSelection,
    ToolOutput,
    DomainEntity,
    CompletedAction,
    ConversationFact,
    TemporaryState,
}

impl MemoryKind {
    /// Persistent kinds never auto-expire.
    pub fn is_persistent(self) -> bool {
        matches!(self, MemoryKind::DomainEntity)
    }
}

/// One vertex of the memory graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryNode {
    pub node_id: Uuid,
    pub user_id: String,
    pub kind: MemoryKind,
    /// Opaque JSON payload; merged field-by-field on dedup.
    pub content: Value,
    pub summary: String,
    pub tags: BTreeSet<String>,
    #[serde(with = "iso8601_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso8601_millis")]
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
    /// Starting relevance in [0, 1]; decays with age.
    pub base_relevance: f64,
    /// Deduplication key half: external id of the business object.
    pub entity_id: Option<String>,
    /// Deduplication key half: system the id belongs to (e.g. `sf`, `jira`).
    pub entity_system: Option<String>,
}

impl MemoryNode {
    /// Dedup key when both halves are present.
    pub fn entity_key(&self) -> Option<(String, String)> {
        match (&self.entity_id, &self.entity_system) {
            (Some(id), Some(system)) => Some((id.clone(), system.clone())),
            _ => None,
        }
    }

    /// Full snapshot for observer events. Carries the complete content;
    /// UIs rebuild their graph view from these frames.
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Input to [`MemoryGraph::store`](crate::memgraph::MemoryGraph::store):
/// a node without identity or timestamps.
#[derive(Clone, Debug)]
pub struct NodeDraft {
    pub kind: MemoryKind,
    pub content: Value,
    pub summary: String,
    pub tags: BTreeSet<String>,
    pub base_relevance: f64,
    pub entity_id: Option<String>,
    pub entity_system: Option<String>,
}

impl NodeDraft {
    pub fn new(kind: MemoryKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            content: Value::Null,
            summary: summary.into(),
            tags: BTreeSet::new(),
            base_relevance: 0.5,
            entity_id: None,
            entity_system: None,
        }
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_relevance(mut self, base_relevance: f64) -> Self {
        self.base_relevance = base_relevance.clamp(0.0, 1.0);
        self
    }

    pub fn with_entity(
        mut self,
        entity_id: impl Into<String>,
        entity_system: impl Into<String>,
    ) -> Self {
        self.entity_id = Some(entity_id.into());
        self.entity_system = Some(entity_system.into());
        self
    }
}

/// Merge rule for deduplicated stores: objects deep-merge per key, arrays union
/// (missing elements appended in source order), scalars take the new value.
pub fn deep_merge(dst: &mut Value, src: &Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (Value::Array(dst_arr), Value::Array(src_arr)) => {
            for v in src_arr {
                if !dst_arr.contains(v) {
                    dst_arr.push(v.clone());
                }
            }
        }
        (dst_slot, src_val) => {
            if !src_val.is_null() {
                *dst_slot = src_val.clone();
            }
        }
    }
}
