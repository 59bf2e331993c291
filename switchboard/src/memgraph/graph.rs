//! The per-user memory graph: ingest with dedup merge, typed edges, ranked
//! retrieval, lazy importance, clustering, bridges, and the decay sweep.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::memgraph::analysis;
use crate::memgraph::edge::{EdgeType, MemoryEdge};
use crate::memgraph::embedder::{cosine, Embedder};
use crate::memgraph::node::{deep_merge, MemoryKind, MemoryNode, NodeDraft};
use crate::memgraph::GraphError;

/// Tuning for decay and retrieval. The retrieval weights follow the scoring
/// contract: 0.35 tags + 0.35 embedding + 0.20 decayed relevance + 0.10
/// centrality; without an embedder the embedding weight folds into tags.
#[derive(Clone, Copy, Debug)]
pub struct GraphConfig {
    /// Relevance lost per hour since creation.
    pub decay_per_hour: f64,
    /// Floor for decayed relevance; below it (and non-persistent) a node is sweepable.
    pub min_relevance: f64,
    /// Extra relevance for recently accessed nodes.
    pub recency_boost: f64,
    /// Window (hours) over which the recency boost fades to zero.
    pub recency_window_hours: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            decay_per_hour: 0.01,
            min_relevance: 0.1,
            recency_boost: 0.1,
            recency_window_hours: 1.0,
        }
    }
}

/// Retrieval request. `text` is tokenized into query tags; explicit tags add to
/// them. Bounds and the floor mirror the executor's defaults.
#[derive(Clone, Debug)]
pub struct RetrievalQuery {
    pub text: String,
    pub tags: Vec<String>,
    pub kinds: Option<Vec<MemoryKind>>,
    pub max_age_hours: Option<f64>,
    pub min_relevance: f64,
    pub limit: usize,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tags: Vec::new(),
            kinds: None,
            max_age_hours: None,
            min_relevance: 0.0,
            limit: 10,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kinds(mut self, kinds: Vec<MemoryKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn with_max_age_hours(mut self, hours: f64) -> Self {
        self.max_age_hours = Some(hours);
        self
    }

    pub fn with_min_relevance(mut self, floor: f64) -> Self {
        self.min_relevance = floor;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// One ranked retrieval hit.
#[derive(Clone, Debug)]
pub struct ScoredNode {
    pub node: MemoryNode,
    pub score: f64,
}

/// Result of one `store` call.
#[derive(Clone, Debug)]
pub struct StoreResult {
    pub node: MemoryNode,
    /// True when the draft merged into an existing `(entity_id, entity_system)` node.
    pub merged: bool,
}

struct GraphInner {
    nodes: HashMap<Uuid, MemoryNode>,
    edges: HashMap<(Uuid, Uuid, EdgeType), f64>,
    by_entity: HashMap<(String, String), Uuid>,
    embeddings: HashMap<Uuid, Vec<f32>>,
    /// Lazy importance cache; any mutation clears it.
    pagerank: Option<HashMap<Uuid, f64>>,
}

/// Typed memory graph for one user. Mutations serialize on the write lock;
/// retrieval runs under the read lock.
pub struct MemoryGraph {
    user_id: String,
    config: GraphConfig,
    embedder: Option<Arc<dyn Embedder>>,
    inner: RwLock<GraphInner>,
}

impl MemoryGraph {
    pub fn new(user_id: impl Into<String>, config: GraphConfig) -> Self {
        Self {
            user_id: user_id.into(),
            config,
            embedder: None,
            inner: RwLock::new(GraphInner {
                nodes: HashMap::new(),
                edges: HashMap::new(),
                by_entity: HashMap::new(),
                embeddings: HashMap::new(),
                pagerank: None,
            }),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Stores a draft. If `(entity_id, entity_system)` already exists for this
    /// user the contents merge: dictionaries deep-merge, arrays union, tags
    /// union, `access_count` bumps and `last_accessed_at` advances. Otherwise a
    /// new node is inserted with `access_count = 1`.
    pub async fn store(&self, draft: NodeDraft) -> Result<StoreResult, GraphError> {
        self.store_at(draft, Utc::now()).await
    }

    /// Clock-explicit variant of [`store`](Self::store) (tests pin the clock).
    pub async fn store_at(
        &self,
        draft: NodeDraft,
        now: DateTime<Utc>,
    ) -> Result<StoreResult, GraphError> {
        // Embed outside the lock; failures degrade to tag-only scoring.
        let embedding = match &self.embedder {
            Some(embedder) if !draft.summary.is_empty() => {
                Some(embedder.embed(&draft.summary).await?)
            }
            _ => None,
        };

        let mut inner = self.inner.write().await;
        inner.pagerank = None;

        let entity_key = match (&draft.entity_id, &draft.entity_system) {
            (Some(id), Some(system)) => Some((id.clone(), system.clone())),
            _ => None,
        };

        if let Some(key) = &entity_key {
            if let Some(existing_id) = inner.by_entity.get(key).copied() {
                let node = inner
                    .nodes
                    .get_mut(&existing_id)
                    .ok_or(GraphError::UnknownNode(existing_id))?;
                deep_merge(&mut node.content, &draft.content);
                node.tags.extend(draft.tags);
                node.summary = if draft.summary.is_empty() {
                    node.summary.clone()
                } else {
                    draft.summary
                };
                node.base_relevance = node.base_relevance.max(draft.base_relevance);
                node.access_count += 1;
                node.last_accessed_at = now;
                let snapshot = node.clone();
                if let Some(v) = embedding {
                    inner.embeddings.insert(existing_id, v);
                }
                debug!(user = %self.user_id, node = %existing_id, "memory store merged");
                return Ok(StoreResult {
                    node: snapshot,
                    merged: true,
                });
            }
        }

        let node_id = Uuid::new_v4();
        let node = MemoryNode {
            node_id,
            user_id: self.user_id.clone(),
            kind: draft.kind,
            content: draft.content,
            summary: draft.summary,
            tags: draft.tags,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            base_relevance: draft.base_relevance.clamp(0.0, 1.0),
            entity_id: draft.entity_id,
            entity_system: draft.entity_system,
        };
        if let Some(key) = entity_key {
            inner.by_entity.insert(key, node_id);
        }
        if let Some(v) = embedding {
            inner.embeddings.insert(node_id, v);
        }
        inner.nodes.insert(node_id, node.clone());
        debug!(user = %self.user_id, node = %node_id, kind = ?node.kind, "memory store inserted");
        Ok(StoreResult {
            node,
            merged: false,
        })
    }

    /// Restores a previously persisted node verbatim (entity-store warm load).
    pub async fn restore(&self, node: MemoryNode) {
        let mut inner = self.inner.write().await;
        inner.pagerank = None;
        if let Some(key) = node.entity_key() {
            inner.by_entity.insert(key, node.node_id);
        }
        inner.nodes.insert(node.node_id, node);
    }

    /// Creates or strengthens a typed edge. Idempotent per `(from, to, type)`:
    /// a repeat call moves the strength toward 1 by a damped step instead of
    /// overwriting. Self-loops are forbidden; both endpoints must exist.
    pub async fn relate(
        &self,
        from: Uuid,
        to: Uuid,
        edge_type: EdgeType,
        strength: f64,
    ) -> Result<MemoryEdge, GraphError> {
        if from == to {
            return Err(GraphError::SelfLoop);
        }
        let strength = strength.clamp(0.0, 1.0);
        let mut inner = self.inner.write().await;
        if !inner.nodes.contains_key(&from) {
            return Err(GraphError::UnknownNode(from));
        }
        if !inner.nodes.contains_key(&to) {
            return Err(GraphError::UnknownNode(to));
        }
        inner.pagerank = None;
        let key = (from, to, edge_type);
        let new_strength = match inner.edges.get(&key) {
            Some(old) => (old + (1.0 - old) * strength * 0.5).min(1.0),
            None => strength,
        };
        inner.edges.insert(key, new_strength);
        Ok(MemoryEdge {
            from,
            to,
            edge_type,
            strength: new_strength,
        })
    }

    fn decayed_relevance(&self, node: &MemoryNode, now: DateTime<Utc>) -> f64 {
        let age_hours = (now - node.created_at).num_milliseconds() as f64 / 3_600_000.0;
        let decayed = (node.base_relevance - age_hours * self.config.decay_per_hour)
            .max(self.config.min_relevance);
        let accessed_hours =
            (now - node.last_accessed_at).num_milliseconds() as f64 / 3_600_000.0;
        let boost = if accessed_hours < self.config.recency_window_hours {
            self.config.recency_boost * (1.0 - accessed_hours / self.config.recency_window_hours)
        } else {
            0.0
        };
        (decayed + boost).clamp(0.0, 1.0)
    }

    fn tokenize(text: &str) -> BTreeSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(|t| t.to_lowercase())
            .collect()
    }

    /// Ranked retrieval. Deterministic for a fixed `now`: ties break by
    /// `created_at` descending, then node id.
    pub async fn retrieve(
        &self,
        query: &RetrievalQuery,
        now: DateTime<Utc>,
    ) -> Vec<ScoredNode> {
        let query_embedding = match &self.embedder {
            Some(embedder) if !query.text.is_empty() => embedder.embed(&query.text).await.ok(),
            _ => None,
        };
        self.ensure_pagerank().await;

        let inner = self.inner.read().await;
        let mut query_tags = Self::tokenize(&query.text);
        query_tags.extend(query.tags.iter().map(|t| t.to_lowercase()));

        let max_rank = inner
            .pagerank
            .as_ref()
            .and_then(|pr| pr.values().cloned().fold(None, |m: Option<f64>, v| {
                Some(m.map_or(v, |m| m.max(v)))
            }))
            .unwrap_or(0.0);

        let mut hits: Vec<ScoredNode> = inner
            .nodes
            .values()
            .filter(|node| {
                if let Some(kinds) = &query.kinds {
                    if !kinds.contains(&node.kind) {
                        return false;
                    }
                }
                if let Some(max_age) = query.max_age_hours {
                    let age_hours =
                        (now - node.created_at).num_milliseconds() as f64 / 3_600_000.0;
                    if age_hours > max_age {
                        return false;
                    }
                }
                true
            })
            .filter_map(|node| {
                let decayed = self.decayed_relevance(node, now);
                if decayed < query.min_relevance {
                    return None;
                }

                let node_tags: BTreeSet<String> = node
                    .tags
                    .iter()
                    .map(|t| t.to_lowercase())
                    .chain(Self::tokenize(&node.summary))
                    .collect();
                let intersection = query_tags.intersection(&node_tags).count() as f64;
                let union = query_tags.union(&node_tags).count() as f64;
                let jaccard = if union == 0.0 { 0.0 } else { intersection / union };

                let semantic = query_embedding.as_ref().and_then(|q| {
                    inner
                        .embeddings
                        .get(&node.node_id)
                        .map(|v| (cosine(q, v) as f64 + 1.0) / 2.0)
                });

                let centrality = if max_rank > 0.0 {
                    inner
                        .pagerank
                        .as_ref()
                        .and_then(|pr| pr.get(&node.node_id))
                        .map(|r| r / max_rank)
                        .unwrap_or(0.0)
                } else {
                    0.0
                };

                let score = match semantic {
                    Some(sem) => {
                        0.35 * jaccard + 0.35 * sem + 0.20 * decayed + 0.10 * centrality
                    }
                    // No vectorizer: embedding weight folds into the tag term.
                    None => 0.70 * jaccard + 0.20 * decayed + 0.10 * centrality,
                };
                Some(ScoredNode {
                    node: node.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.node.created_at.cmp(&a.node.created_at))
                .then(a.node.node_id.cmp(&b.node.node_id))
        });
        hits.truncate(query.limit);
        hits
    }

    async fn ensure_pagerank(&self) {
        {
            let inner = self.inner.read().await;
            if inner.pagerank.is_some() {
                return;
            }
        }
        let mut inner = self.inner.write().await;
        if inner.pagerank.is_some() {
            return;
        }
        let nodes: Vec<Uuid> = inner.nodes.keys().copied().collect();
        let mut out: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (from, to, _) in inner.edges.keys() {
            out.entry(*from).or_default().push(*to);
        }
        inner.pagerank = Some(analysis::pagerank(&nodes, &out, 20));
    }

    /// PageRank importance per node (lazy, cached until the next mutation).
    pub async fn importance(&self) -> HashMap<Uuid, f64> {
        self.ensure_pagerank().await;
        let inner = self.inner.read().await;
        inner.pagerank.clone().unwrap_or_default()
    }

    fn undirected(inner: &GraphInner) -> HashMap<Uuid, Vec<Uuid>> {
        let mut adj: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (from, to, _) in inner.edges.keys() {
            adj.entry(*from).or_default().push(*to);
            adj.entry(*to).or_default().push(*from);
        }
        adj
    }

    /// Topic clusters over the undirected projection (label propagation).
    pub async fn clusters(&self) -> Vec<Vec<Uuid>> {
        let inner = self.inner.read().await;
        let nodes: Vec<Uuid> = inner.nodes.keys().copied().collect();
        analysis::label_clusters(&nodes, &Self::undirected(&inner))
    }

    /// Nodes with the highest betweenness centrality ("connecting concepts").
    pub async fn bridges(&self, top_n: usize) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        let nodes: Vec<Uuid> = inner.nodes.keys().copied().collect();
        analysis::bridges(&nodes, &Self::undirected(&inner), top_n)
    }

    /// Decay sweep: removes nodes whose decayed relevance (without the recency
    /// boost) fell to the floor, unless persistent. Edges die with endpoints.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().await;
        let doomed: Vec<Uuid> = inner
            .nodes
            .values()
            .filter(|node| {
                if node.kind.is_persistent() {
                    return false;
                }
                let age_hours = (now - node.created_at).num_milliseconds() as f64 / 3_600_000.0;
                node.base_relevance - age_hours * self.config.decay_per_hour
                    < self.config.min_relevance
            })
            .map(|n| n.node_id)
            .collect();
        if doomed.is_empty() {
            return 0;
        }
        inner.pagerank = None;
        for id in &doomed {
            if let Some(node) = inner.nodes.remove(id) {
                if let Some(key) = node.entity_key() {
                    inner.by_entity.remove(&key);
                }
            }
            inner.embeddings.remove(id);
        }
        inner
            .edges
            .retain(|(from, to, _), _| !doomed.contains(from) && !doomed.contains(to));
        debug!(user = %self.user_id, removed = doomed.len(), "memory sweep");
        doomed.len()
    }

    pub async fn node(&self, id: Uuid) -> Option<MemoryNode> {
        self.inner.read().await.nodes.get(&id).cloned()
    }

    pub async fn node_count(&self) -> usize {
        self.inner.read().await.nodes.len()
    }

    pub async fn edge_strength(&self, from: Uuid, to: Uuid, edge_type: EdgeType) -> Option<f64> {
        self.inner
            .read()
            .await
            .edges
            .get(&(from, to, edge_type))
            .copied()
    }

    pub async fn edges(&self) -> Vec<MemoryEdge> {
        self.inner
            .read()
            .await
            .edges
            .iter()
            .map(|((from, to, edge_type), strength)| MemoryEdge {
                from: *from,
                to: *to,
                edge_type: *edge_type,
                strength: *strength,
            })
            .collect()
    }

    /// Compact snapshot for UI bootstrap: node headlines plus edge tuples.
    pub async fn snapshot(&self) -> Value {
        let inner = self.inner.read().await;
        let mut nodes: Vec<&MemoryNode> = inner.nodes.values().collect();
        nodes.sort_by_key(|n| n.created_at);
        json!({
            "user_id": self.user_id,
            "nodes": nodes
                .iter()
                .map(|n| {
                    json!({
                        "node_id": n.node_id,
                        "kind": n.kind,
                        "summary": n.summary,
                        "tags": n.tags,
                        "access_count": n.access_count,
                    })
                })
                .collect::<Vec<_>>(),
            "edges": inner
                .edges
                .iter()
                .map(|((from, to, ty), strength)| json!([from, to, ty.as_str(), strength]))
                .collect::<Vec<_>>(),
        })
    }
}
