//! Memory service: one graph per user, warm-loaded from the entity store.
//!
//! The engine talks to this service, not to graphs directly. `DomainEntity`
//! ingests commit durably before returning, which is what makes cross-thread
//! reads of the same user's entities read-your-writes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::checkpoint::EntityStore;
use crate::memgraph::{
    EdgeType, Embedder, GraphConfig, GraphError, MemoryEdge, MemoryGraph, MemoryKind, NodeDraft,
    RetrievalQuery, ScoredNode, StoreResult,
};

/// Per-user graphs plus optional durable entity persistence.
pub struct MemoryService {
    config: GraphConfig,
    embedder: Option<Arc<dyn Embedder>>,
    entities: Option<Arc<dyn EntityStore>>,
    graphs: Mutex<HashMap<String, Arc<MemoryGraph>>>,
}

impl MemoryService {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            embedder: None,
            entities: None,
            graphs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_entity_store(mut self, entities: Arc<dyn EntityStore>) -> Self {
        self.entities = Some(entities);
        self
    }

    /// Returns the user's graph, creating and warm-loading it on first access.
    pub async fn graph_for(&self, user_id: &str) -> Result<Arc<MemoryGraph>, GraphError> {
        let mut graphs = self.graphs.lock().await;
        if let Some(graph) = graphs.get(user_id) {
            return Ok(Arc::clone(graph));
        }

        let mut graph = MemoryGraph::new(user_id, self.config);
        if let Some(embedder) = &self.embedder {
            graph = graph.with_embedder(Arc::clone(embedder));
        }
        let graph = Arc::new(graph);

        if let Some(store) = &self.entities {
            let nodes = store
                .load_entities(user_id)
                .await
                .map_err(|e| GraphError::Persistence(e.to_string()))?;
            let count = nodes.len();
            for node in nodes {
                graph.restore(node).await;
            }
            match store.load_relationships(user_id).await {
                Ok(edges) => {
                    for edge in edges {
                        // Endpoints may have been swept; missing ones just skip.
                        let _ = graph
                            .relate(edge.from, edge.to, edge.edge_type, edge.strength)
                            .await;
                    }
                }
                Err(e) => warn!(user = %user_id, error = %e, "relationship load failed"),
            }
            debug!(user = %user_id, entities = count, "memory graph warm-loaded");
        }

        graphs.insert(user_id.to_string(), Arc::clone(&graph));
        Ok(graph)
    }

    /// Stores a draft in the user's graph; `DomainEntity` nodes also commit to
    /// the entity store before this returns.
    pub async fn ingest(
        &self,
        user_id: &str,
        draft: NodeDraft,
    ) -> Result<StoreResult, GraphError> {
        let graph = self.graph_for(user_id).await?;
        let result = graph.store(draft).await?;
        if result.node.kind == MemoryKind::DomainEntity {
            if let Some(store) = &self.entities {
                store
                    .upsert_entity(&result.node)
                    .await
                    .map_err(|e| GraphError::Persistence(e.to_string()))?;
            }
        }
        Ok(result)
    }

    /// Relates two nodes; edges between persistent entities are persisted too.
    pub async fn relate(
        &self,
        user_id: &str,
        from: Uuid,
        to: Uuid,
        edge_type: EdgeType,
        strength: f64,
    ) -> Result<MemoryEdge, GraphError> {
        let graph = self.graph_for(user_id).await?;
        let edge = graph.relate(from, to, edge_type, strength).await?;
        if let Some(store) = &self.entities {
            let from_persistent = graph
                .node(from)
                .await
                .map(|n| n.kind.is_persistent())
                .unwrap_or(false);
            let to_persistent = graph
                .node(to)
                .await
                .map(|n| n.kind.is_persistent())
                .unwrap_or(false);
            if from_persistent && to_persistent {
                store
                    .upsert_relationship(user_id, &edge)
                    .await
                    .map_err(|e| GraphError::Persistence(e.to_string()))?;
            }
        }
        Ok(edge)
    }

    pub async fn retrieve(
        &self,
        user_id: &str,
        query: &RetrievalQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredNode>, GraphError> {
        let graph = self.graph_for(user_id).await?;
        Ok(graph.retrieve(query, now).await)
    }

    /// Runs the decay sweep on every loaded graph; returns total removed.
    pub async fn sweep_all(&self, now: DateTime<Utc>) -> usize {
        let graphs: Vec<Arc<MemoryGraph>> =
            self.graphs.lock().await.values().cloned().collect();
        let mut removed = 0;
        for graph in graphs {
            removed += graph.sweep(now).await;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;

    fn service_with_store() -> (Arc<MemoryCheckpointStore>, MemoryService) {
        let store = Arc::new(MemoryCheckpointStore::new());
        let service = MemoryService::new(GraphConfig::default())
            .with_entity_store(store.clone() as Arc<dyn EntityStore>);
        (store, service)
    }

    fn entity_draft(id: &str) -> NodeDraft {
        NodeDraft::new(MemoryKind::DomainEntity, format!("account {}", id))
            .with_content(serde_json::json!({"id": id}))
            .with_relevance(0.9)
            .with_entity(id, "sf")
    }

    /// **Scenario**: DomainEntity ingest commits durably; a fresh service for the
    /// same user sees it (read-your-writes across threads via the store).
    #[tokio::test]
    async fn entities_survive_service_restart() {
        let (store, service) = service_with_store();
        service.ingest("u1", entity_draft("001")).await.unwrap();

        let service2 = MemoryService::new(GraphConfig::default())
            .with_entity_store(store as Arc<dyn EntityStore>);
        let graph = service2.graph_for("u1").await.unwrap();
        assert_eq!(graph.node_count().await, 1);
        let hits = graph
            .retrieve(&RetrievalQuery::new("account"), Utc::now())
            .await;
        assert_eq!(hits[0].node.entity_id.as_deref(), Some("001"));
    }

    /// **Scenario**: Transient nodes are not persisted to the entity store.
    #[tokio::test]
    async fn transient_nodes_stay_in_process() {
        let (store, service) = service_with_store();
        service
            .ingest(
                "u1",
                NodeDraft::new(MemoryKind::ToolOutput, "scratch output"),
            )
            .await
            .unwrap();
        assert!(store.load_entities("u1").await.unwrap().is_empty());
    }

    /// **Scenario**: Users are isolated — one user's entities never leak to another.
    #[tokio::test]
    async fn users_are_isolated() {
        let (_store, service) = service_with_store();
        service.ingest("u1", entity_draft("001")).await.unwrap();
        let g2 = service.graph_for("u2").await.unwrap();
        assert_eq!(g2.node_count().await, 0);
    }

    /// **Scenario**: An edge between two persisted entities is persisted as well.
    #[tokio::test]
    async fn entity_edges_persist() {
        let (store, service) = service_with_store();
        let a = service
            .ingest("u1", entity_draft("001"))
            .await
            .unwrap()
            .node
            .node_id;
        let b = service
            .ingest("u1", entity_draft("002"))
            .await
            .unwrap()
            .node
            .node_id;
        service
            .relate("u1", a, b, EdgeType::RelatesTo, 0.7)
            .await
            .unwrap();
        let edges = store.load_relationships("u1").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_type, EdgeType::RelatesTo);
    }
}
