//! SQLite-backed checkpoint + entity store. Persistent across process restarts.
//!
//! KV rows keep `(ns, key)` primary keys; entity rows are unique per
//! `(user_id, entity_id, entity_system)` and relationship rows per
//! `(user_id, from_id, to_id, edge_type)`. Timestamps are maintained here, not
//! by callers. Uses spawn_blocking around rusqlite.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::params;
use serde_json::Value;
use uuid::Uuid;

use crate::memgraph::{EdgeType, MemoryEdge, MemoryKind, MemoryNode};

use super::{CheckpointError, CheckpointStore, EntityStore, Namespace};

fn ns_to_key(ns: &Namespace) -> String {
    serde_json::to_string(ns).unwrap_or_else(|_| "[]".to_string())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn storage_err<E: std::fmt::Display>(e: E) -> CheckpointError {
    CheckpointError::Storage(e.to_string())
}

/// SQLite store for checkpoints and long-term entities. Single file, single
/// node; opens a connection per operation inside spawn_blocking.
pub struct SqliteCheckpointStore {
    db_path: std::path::PathBuf,
}

impl SqliteCheckpointStore {
    /// Creates the store and ensures all tables exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path).map_err(storage_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoint_kv (
                ns TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (ns, key)
            );
            CREATE TABLE IF NOT EXISTS memory_entities (
                user_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                entity_system TEXT NOT NULL,
                node_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                summary TEXT NOT NULL,
                tags TEXT NOT NULL,
                base_relevance REAL NOT NULL,
                access_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, entity_id, entity_system)
            );
            CREATE INDEX IF NOT EXISTS idx_entities_user
                ON memory_entities (user_id);
            CREATE TABLE IF NOT EXISTS memory_relationships (
                user_id TEXT NOT NULL,
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                edge_type TEXT NOT NULL,
                strength REAL NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, from_id, to_id, edge_type)
            );
            "#,
        )
        .map_err(storage_err)?;
        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, CheckpointError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, CheckpointError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| CheckpointError::Unavailable(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(storage_err)?
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, ns: &Namespace, key: &str, blob: &Value) -> Result<(), CheckpointError> {
        let ns = ns_to_key(ns);
        let key = key.to_string();
        let value = serde_json::to_string(blob)?;
        self.with_conn(move |conn| {
            let now = now_millis();
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT created_at FROM checkpoint_kv WHERE ns = ?1 AND key = ?2",
                    params![ns, key],
                    |row| row.get(0),
                )
                .ok();
            conn.execute(
                "INSERT OR REPLACE INTO checkpoint_kv (ns, key, value, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![ns, key, value, existing.unwrap_or(now), now],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, ns: &Namespace, key: &str) -> Result<Option<Value>, CheckpointError> {
        let ns = ns_to_key(ns);
        let key = key.to_string();
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM checkpoint_kv WHERE ns = ?1 AND key = ?2",
                    params![ns, key],
                    |row| row.get(0),
                )
                .ok();
            match raw {
                Some(text) => Ok(Some(
                    serde_json::from_str(&text)
                        .map_err(|e| CheckpointError::Serialization(e.to_string()))?,
                )),
                None => Ok(None),
            }
        })
        .await
    }

    async fn delete(&self, ns: &Namespace, key: &str) -> Result<(), CheckpointError> {
        let ns = ns_to_key(ns);
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM checkpoint_kv WHERE ns = ?1 AND key = ?2",
                params![ns, key],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn list_keys(&self, ns: &Namespace) -> Result<Vec<String>, CheckpointError> {
        let ns = ns_to_key(ns);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT key FROM checkpoint_kv WHERE ns = ?1 ORDER BY key")
                .map_err(storage_err)?;
            let keys = stmt
                .query_map(params![ns], |row| row.get::<_, String>(0))
                .map_err(storage_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err)?;
            Ok(keys)
        })
        .await
    }
}

#[async_trait]
impl EntityStore for SqliteCheckpointStore {
    async fn upsert_entity(&self, node: &MemoryNode) -> Result<(), CheckpointError> {
        let (entity_id, entity_system) = node.entity_key().ok_or_else(|| {
            CheckpointError::Serialization("entity node missing (entity_id, entity_system)".into())
        })?;
        let user_id = node.user_id.clone();
        let node_id = node.node_id.to_string();
        let kind = serde_json::to_string(&node.kind)?;
        let content = serde_json::to_string(&node.content)?;
        let summary = node.summary.clone();
        let tags = serde_json::to_string(&node.tags)?;
        let base_relevance = node.base_relevance;
        let access_count = node.access_count as i64;
        let created = node.created_at.timestamp_millis();

        self.with_conn(move |conn| {
            let now = now_millis();
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT created_at FROM memory_entities
                     WHERE user_id = ?1 AND entity_id = ?2 AND entity_system = ?3",
                    params![user_id, entity_id, entity_system],
                    |row| row.get(0),
                )
                .ok();
            conn.execute(
                "INSERT OR REPLACE INTO memory_entities
                 (user_id, entity_id, entity_system, node_id, kind, content, summary, tags,
                  base_relevance, access_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    user_id,
                    entity_id,
                    entity_system,
                    node_id,
                    kind,
                    content,
                    summary,
                    tags,
                    base_relevance,
                    access_count,
                    existing.unwrap_or(created),
                    now
                ],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn load_entities(&self, user_id: &str) -> Result<Vec<MemoryNode>, CheckpointError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT entity_id, entity_system, node_id, kind, content, summary, tags,
                            base_relevance, access_count, created_at, updated_at
                     FROM memory_entities WHERE user_id = ?1 ORDER BY created_at",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![user_id.clone()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, i64>(9)?,
                        row.get::<_, i64>(10)?,
                    ))
                })
                .map_err(storage_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err)?;

            let mut nodes = Vec::with_capacity(rows.len());
            for (
                entity_id,
                entity_system,
                node_id,
                kind,
                content,
                summary,
                tags,
                base_relevance,
                access_count,
                created_at,
                updated_at,
            ) in rows
            {
                let kind: MemoryKind = serde_json::from_str(&kind)
                    .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
                let tags: BTreeSet<String> = serde_json::from_str(&tags)
                    .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
                nodes.push(MemoryNode {
                    node_id: Uuid::from_str(&node_id)
                        .map_err(|e| CheckpointError::Serialization(e.to_string()))?,
                    user_id: user_id.clone(),
                    kind,
                    content: serde_json::from_str(&content)
                        .map_err(|e| CheckpointError::Serialization(e.to_string()))?,
                    summary,
                    tags,
                    created_at: millis_to_utc(created_at),
                    last_accessed_at: millis_to_utc(updated_at),
                    access_count: access_count as u32,
                    base_relevance,
                    entity_id: Some(entity_id),
                    entity_system: Some(entity_system),
                });
            }
            Ok(nodes)
        })
        .await
    }

    async fn upsert_relationship(
        &self,
        user_id: &str,
        edge: &MemoryEdge,
    ) -> Result<(), CheckpointError> {
        let user_id = user_id.to_string();
        let from = edge.from.to_string();
        let to = edge.to.to_string();
        let edge_type = edge.edge_type.as_str().to_string();
        let strength = edge.strength;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO memory_relationships
                 (user_id, from_id, to_id, edge_type, strength, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (user_id, from_id, to_id, edge_type)
                 DO UPDATE SET strength = excluded.strength",
                params![user_id, from, to, edge_type, strength, now_millis()],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn load_relationships(
        &self,
        user_id: &str,
    ) -> Result<Vec<MemoryEdge>, CheckpointError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT from_id, to_id, edge_type, strength
                     FROM memory_relationships WHERE user_id = ?1 ORDER BY created_at",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                })
                .map_err(storage_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err)?;

            let mut edges = Vec::with_capacity(rows.len());
            for (from, to, edge_type, strength) in rows {
                let Some(edge_type) = EdgeType::parse(&edge_type) else {
                    continue; // unknown type from a newer schema; skip
                };
                edges.push(MemoryEdge {
                    from: Uuid::from_str(&from)
                        .map_err(|e| CheckpointError::Serialization(e.to_string()))?,
                    to: Uuid::from_str(&to)
                        .map_err(|e| CheckpointError::Serialization(e.to_string()))?,
                    edge_type,
                    strength,
                });
            }
            Ok(edges)
        })
        .await
    }
}
