//! SQLite-backed graph store.
//!
//! One database file holds every analyzed codebase, scoped by
//! `codebase_id`. WAL journaling keeps concurrent readers cheap while a
//! build is writing.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use super::{EdgeKind, GraphEdge, GraphNode, GraphSnapshot, GraphStore, NodeKind};
use crate::error::PipelineError;

pub struct SqliteGraph {
    pool: SqlitePool,
}

fn store_err(context: &str, e: sqlx::Error) -> PipelineError {
    PipelineError::GraphWrite(format!("{}: {}", context, e))
}

impl SqliteGraph {
    /// Open (and create if needed) the database at `path` and run
    /// migrations.
    pub async fn connect(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PipelineError::GraphWrite(format!(
                        "failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| store_err("invalid database path", e))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| store_err("failed to open graph database", e))?;

        let store = Self { pool };
        store.migrate().await?;
        debug!(path = %path.display(), "graph database ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                codebase_id TEXT NOT NULL,
                kind        TEXT NOT NULL,
                node_key    TEXT NOT NULL,
                properties  TEXT NOT NULL,
                PRIMARY KEY (codebase_id, kind, node_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("failed to create nodes table", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS edges (
                codebase_id TEXT NOT NULL,
                kind        TEXT NOT NULL,
                src_key     TEXT NOT NULL,
                dst_key     TEXT NOT NULL,
                properties  TEXT NOT NULL,
                PRIMARY KEY (codebase_id, kind, src_key, dst_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("failed to create edges table", e))?;

        Ok(())
    }

    async fn node_exists(
        &self,
        codebase_id: &str,
        kind: NodeKind,
        key: &str,
    ) -> Result<bool, PipelineError> {
        let row = sqlx::query(
            "SELECT 1 FROM nodes WHERE codebase_id = ? AND kind = ? AND node_key = ?",
        )
        .bind(codebase_id)
        .bind(kind.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("node existence check failed", e))?;
        Ok(row.is_some())
    }
}

fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> Result<GraphNode, PipelineError> {
    let kind_str: String = row.get("kind");
    let kind = NodeKind::parse(&kind_str)
        .ok_or_else(|| PipelineError::GraphWrite(format!("unknown node kind '{}'", kind_str)))?;
    let properties_str: String = row.get("properties");
    let properties = serde_json::from_str(&properties_str)
        .map_err(|e| PipelineError::GraphWrite(format!("corrupt node properties: {}", e)))?;
    Ok(GraphNode {
        kind,
        key: row.get("node_key"),
        properties,
    })
}

fn row_to_edge(row: &sqlx::sqlite::SqliteRow) -> Result<GraphEdge, PipelineError> {
    let kind_str: String = row.get("kind");
    let kind = EdgeKind::parse(&kind_str)
        .ok_or_else(|| PipelineError::GraphWrite(format!("unknown edge kind '{}'", kind_str)))?;
    let properties_str: String = row.get("properties");
    let properties = serde_json::from_str(&properties_str)
        .map_err(|e| PipelineError::GraphWrite(format!("corrupt edge properties: {}", e)))?;
    Ok(GraphEdge {
        kind,
        src_key: row.get("src_key"),
        dst_key: row.get("dst_key"),
        properties,
    })
}

#[async_trait]
impl GraphStore for SqliteGraph {
    async fn clear_codebase(&self, codebase_id: &str) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM edges WHERE codebase_id = ?")
            .bind(codebase_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("failed to clear edges", e))?;
        sqlx::query("DELETE FROM nodes WHERE codebase_id = ?")
            .bind(codebase_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("failed to clear nodes", e))?;
        Ok(())
    }

    async fn upsert_node(&self, codebase_id: &str, node: &GraphNode) -> Result<(), PipelineError> {
        super::require_keys(&[&node.key])?;
        let properties = serde_json::to_string(&node.properties)
            .map_err(|e| PipelineError::GraphWrite(format!("unserializable properties: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO nodes (codebase_id, kind, node_key, properties)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (codebase_id, kind, node_key)
            DO UPDATE SET properties = excluded.properties
            "#,
        )
        .bind(codebase_id)
        .bind(node.kind.as_str())
        .bind(&node.key)
        .bind(properties)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("node upsert failed", e))?;
        Ok(())
    }

    async fn upsert_edge(&self, codebase_id: &str, edge: &GraphEdge) -> Result<(), PipelineError> {
        super::require_keys(&[&edge.src_key, &edge.dst_key])?;
        let (src_kind, dst_kind) = edge.kind.endpoints();
        for (kind, key) in [(src_kind, &edge.src_key), (dst_kind, &edge.dst_key)] {
            if !self.node_exists(codebase_id, kind, key).await? {
                return Err(PipelineError::GraphWrite(format!(
                    "edge {} references missing {} node '{}'",
                    edge.kind.as_str(),
                    kind.as_str(),
                    key
                )));
            }
        }

        let properties = serde_json::to_string(&edge.properties)
            .map_err(|e| PipelineError::GraphWrite(format!("unserializable properties: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO edges (codebase_id, kind, src_key, dst_key, properties)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (codebase_id, kind, src_key, dst_key)
            DO UPDATE SET properties = excluded.properties
            "#,
        )
        .bind(codebase_id)
        .bind(edge.kind.as_str())
        .bind(&edge.src_key)
        .bind(&edge.dst_key)
        .bind(properties)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("edge upsert failed", e))?;
        Ok(())
    }

    async fn nodes_of_kind(
        &self,
        codebase_id: &str,
        kind: NodeKind,
    ) -> Result<Vec<GraphNode>, PipelineError> {
        let rows = sqlx::query(
            "SELECT kind, node_key, properties FROM nodes
             WHERE codebase_id = ? AND kind = ? ORDER BY node_key",
        )
        .bind(codebase_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("node query failed", e))?;
        rows.iter().map(row_to_node).collect()
    }

    async fn node(
        &self,
        codebase_id: &str,
        kind: NodeKind,
        key: &str,
    ) -> Result<Option<GraphNode>, PipelineError> {
        let row = sqlx::query(
            "SELECT kind, node_key, properties FROM nodes
             WHERE codebase_id = ? AND kind = ? AND node_key = ?",
        )
        .bind(codebase_id)
        .bind(kind.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("node lookup failed", e))?;
        row.as_ref().map(row_to_node).transpose()
    }

    async fn edges_of_kind(
        &self,
        codebase_id: &str,
        kind: EdgeKind,
    ) -> Result<Vec<GraphEdge>, PipelineError> {
        let rows = sqlx::query(
            "SELECT kind, src_key, dst_key, properties FROM edges
             WHERE codebase_id = ? AND kind = ? ORDER BY src_key, dst_key",
        )
        .bind(codebase_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("edge query failed", e))?;
        rows.iter().map(row_to_edge).collect()
    }

    async fn snapshot(&self, codebase_id: &str) -> Result<GraphSnapshot, PipelineError> {
        let mut snapshot = GraphSnapshot {
            codebase_id: codebase_id.to_string(),
            ..GraphSnapshot::default()
        };

        let node_rows = sqlx::query(
            "SELECT kind, COUNT(*) AS n FROM nodes WHERE codebase_id = ? GROUP BY kind",
        )
        .bind(codebase_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("snapshot query failed", e))?;
        for row in &node_rows {
            let kind: String = row.get("kind");
            let count: i64 = row.get("n");
            snapshot.node_counts.insert(kind, count as u64);
            snapshot.total_nodes += count as u64;
        }

        let edge_rows = sqlx::query(
            "SELECT kind, COUNT(*) AS n FROM edges WHERE codebase_id = ? GROUP BY kind",
        )
        .bind(codebase_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("snapshot query failed", e))?;
        for row in &edge_rows {
            let kind: String = row.get("kind");
            let count: i64 = row.get("n");
            snapshot.edge_counts.insert(kind, count as u64);
            snapshot.total_edges += count as u64;
        }

        Ok(snapshot)
    }

    async fn list_codebases(&self) -> Result<Vec<String>, PipelineError> {
        let rows = sqlx::query("SELECT DISTINCT codebase_id FROM nodes ORDER BY codebase_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("codebase listing failed", e))?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("codebase_id"))
            .collect())
    }
}
