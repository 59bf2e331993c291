//! # Checkpointing and durable entity storage
//!
//! Two capabilities behind traits:
//!
//! 1. [`CheckpointStore`] — durable KV `(namespace, key) -> blob` holding
//!    engine-serialized workflow state. Durability is per write; reads see the
//!    latest committed value; concurrent writers to one key serialize
//!    (last-writer-wins is fine — at most one engine per thread).
//! 2. [`EntityStore`] — per-user partitioned storage for `DomainEntity` memory
//!    nodes and their relationships, unique on `(user_id, entity_id,
//!    entity_system)` with server-side timestamp maintenance.
//!
//! | Type | Persistence | Use case |
//! |---|---|---|
//! | [`MemoryCheckpointStore`] | In-memory | Dev, tests |
//! | [`SqliteCheckpointStore`] | SQLite file | Single-node, production |

mod memory;
mod sqlite;

pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::memgraph::{MemoryEdge, MemoryNode};

/// Namespace tuple, e.g. `["workflow", "instances"]` or `["memory", user_id]`.
pub type Namespace = Vec<String>;

/// Builds the conventional namespaces used by the engine.
pub mod ns {
    use super::Namespace;

    /// Workflow checkpoints, keyed by task id.
    pub fn workflow_instances() -> Namespace {
        vec!["workflow".to_string(), "instances".to_string()]
    }

    /// Per-thread workflow state for one user, keyed by `state_<threadID>`.
    pub fn memory(user_id: &str) -> Namespace {
        vec!["memory".to_string(), user_id.to_string()]
    }

    pub fn thread_state_key(thread_id: &str) -> String {
        format!("state_{}", thread_id)
    }
}

/// Error type for checkpoint and entity store operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Write collision with another writer for the same key. Impossible in
    /// steady state (one writer per thread); observing it aborts the engine.
    #[error("conflict on key: {0}")]
    Conflict(String),
    /// Store is down. Fatal for the current request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Serialization(e.to_string())
    }
}

/// Durable KV for workflow state. The single source of truth for resuming a
/// thread after a crash or interrupt.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persists one blob. Returns only after the write is durable.
    async fn put(&self, ns: &Namespace, key: &str, blob: &Value) -> Result<(), CheckpointError>;

    /// Latest committed value for the key, or `None`.
    async fn get(&self, ns: &Namespace, key: &str) -> Result<Option<Value>, CheckpointError>;

    async fn delete(&self, ns: &Namespace, key: &str) -> Result<(), CheckpointError>;

    /// Keys currently present in the namespace (for recovery enumeration).
    async fn list_keys(&self, ns: &Namespace) -> Result<Vec<String>, CheckpointError>;
}

/// Durable long-term memory for `DomainEntity` nodes, partitioned per user.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Inserts or updates by `(user_id, entity_id, entity_system)`; the row's
    /// `updated_at` is maintained by the store.
    async fn upsert_entity(&self, node: &MemoryNode) -> Result<(), CheckpointError>;

    async fn load_entities(&self, user_id: &str) -> Result<Vec<MemoryNode>, CheckpointError>;

    /// Inserts or updates by `(user_id, from, to, type)`.
    async fn upsert_relationship(
        &self,
        user_id: &str,
        edge: &MemoryEdge,
    ) -> Result<(), CheckpointError>;

    async fn load_relationships(&self, user_id: &str)
        -> Result<Vec<MemoryEdge>, CheckpointError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Display of each CheckpointError variant contains expected keywords.
    #[test]
    fn checkpoint_error_display_all_variants() {
        assert!(CheckpointError::Serialization("err".into())
            .to_string()
            .contains("serialization"));
        assert!(CheckpointError::Storage("io".into())
            .to_string()
            .contains("storage"));
        assert!(CheckpointError::NotFound("k".into())
            .to_string()
            .contains("not found"));
        assert!(CheckpointError::Conflict("k".into())
            .to_string()
            .contains("conflict"));
        assert!(CheckpointError::Unavailable("down".into())
            .to_string()
            .contains("unavailable"));
    }

    /// **Scenario**: Conventional namespaces match the persisted layout contract.
    #[test]
    fn conventional_namespaces() {
        assert_eq!(ns::workflow_instances(), vec!["workflow", "instances"]);
        assert_eq!(ns::memory("u1"), vec!["memory", "u1"]);
        assert_eq!(ns::thread_state_key("t-9"), "state_t-9");
    }
}
