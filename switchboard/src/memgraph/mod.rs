//! # Per-user memory graph
//!
//! A typed graph of memory nodes and directed edges, one graph per user.
//! Ingest dedups on `(entity_id, entity_system)` and merges instead of
//! duplicating; retrieval ranks by tag overlap, optional embedding similarity,
//! time-decayed relevance and graph centrality. `DomainEntity` nodes persist
//! across threads (and process restarts, through the entity store); everything
//! else decays and is swept.
//!
//! Structural operations take node ids, never references: `RelatesTo` edges may
//! form cycles and ids keep the graph safe to snapshot and persist.
//!
//! Writes are serialized per user behind a `tokio::sync::RwLock`; retrieval is
//! read-only and runs under the read half.

mod analysis;
mod edge;
mod embedder;
mod graph;
mod node;
mod service;

pub use edge::{EdgeType, MemoryEdge};
pub use embedder::{cosine, Embedder};
pub use graph::{GraphConfig, MemoryGraph, RetrievalQuery, ScoredNode, StoreResult};
pub use node::{deep_merge, MemoryKind, MemoryNode, NodeDraft};
pub use service::MemoryService;

use thiserror::Error;

/// Error for memory graph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown node: {0}")]
    UnknownNode(uuid::Uuid),
    #[error("self-loop edges are forbidden")]
    SelfLoop,
    #[error("embedding: {0}")]
    Embedding(String),
    #[error("persistence: {0}")]
    Persistence(String),
}
