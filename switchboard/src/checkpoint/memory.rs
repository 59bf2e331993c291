//! In-memory checkpoint + entity store. Not persistent; for dev and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::memgraph::{MemoryEdge, MemoryNode};

use super::{CheckpointError, CheckpointStore, EntityStore, Namespace};

fn ns_key(ns: &Namespace) -> String {
    serde_json::to_string(ns).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Default)]
struct Inner {
    kv: HashMap<(String, String), Value>,
    entities: HashMap<(String, String, String), MemoryNode>,
    relationships: HashMap<(String, String, String, String), MemoryEdge>,
}

/// In-memory implementation of both stores. Durability ends with the process.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    inner: RwLock<Inner>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, ns: &Namespace, key: &str, blob: &Value) -> Result<(), CheckpointError> {
        let mut inner = self.inner.write().await;
        inner.kv.insert((ns_key(ns), key.to_string()), blob.clone());
        Ok(())
    }

    async fn get(&self, ns: &Namespace, key: &str) -> Result<Option<Value>, CheckpointError> {
        let inner = self.inner.read().await;
        Ok(inner.kv.get(&(ns_key(ns), key.to_string())).cloned())
    }

    async fn delete(&self, ns: &Namespace, key: &str) -> Result<(), CheckpointError> {
        let mut inner = self.inner.write().await;
        inner.kv.remove(&(ns_key(ns), key.to_string()));
        Ok(())
    }

    async fn list_keys(&self, ns: &Namespace) -> Result<Vec<String>, CheckpointError> {
        let inner = self.inner.read().await;
        let prefix = ns_key(ns);
        let mut keys: Vec<String> = inner
            .kv
            .keys()
            .filter(|(n, _)| *n == prefix)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl EntityStore for MemoryCheckpointStore {
    async fn upsert_entity(&self, node: &MemoryNode) -> Result<(), CheckpointError> {
        let (entity_id, entity_system) = node.entity_key().ok_or_else(|| {
            CheckpointError::Serialization("entity node missing (entity_id, entity_system)".into())
        })?;
        let mut inner = self.inner.write().await;
        inner
            .entities
            .insert((node.user_id.clone(), entity_id, entity_system), node.clone());
        Ok(())
    }

    async fn load_entities(&self, user_id: &str) -> Result<Vec<MemoryNode>, CheckpointError> {
        let inner = self.inner.read().await;
        let mut nodes: Vec<MemoryNode> = inner
            .entities
            .iter()
            .filter(|((u, _, _), _)| u == user_id)
            .map(|(_, n)| n.clone())
            .collect();
        nodes.sort_by_key(|n| n.created_at);
        Ok(nodes)
    }

    async fn upsert_relationship(
        &self,
        user_id: &str,
        edge: &MemoryEdge,
    ) -> Result<(), CheckpointError> {
        let mut inner = self.inner.write().await;
        inner.relationships.insert(
            (
                user_id.to_string(),
                edge.from.to_string(),
                edge.to.to_string(),
                edge.edge_type.as_str().to_string(),
            ),
            edge.clone(),
        );
        Ok(())
    }

    async fn load_relationships(
        &self,
        user_id: &str,
    ) -> Result<Vec<MemoryEdge>, CheckpointError> {
        let inner = self.inner.read().await;
        Ok(inner
            .relationships
            .iter()
            .filter(|((u, _, _, _), _)| u == user_id)
            .map(|(_, e)| e.clone())
            .collect())
    }
}
