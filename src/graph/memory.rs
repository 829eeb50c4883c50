//! In-memory graph store, primarily for tests and dry runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{EdgeKind, GraphEdge, GraphNode, GraphSnapshot, GraphStore, NodeKind};
use crate::error::PipelineError;

#[derive(Default)]
struct CodebaseGraph {
    nodes: BTreeMap<(NodeKind, String), GraphNode>,
    edges: BTreeMap<(EdgeKind, String, String), GraphEdge>,
}

#[derive(Default)]
pub struct MemoryGraph {
    inner: RwLock<HashMap<String, CodebaseGraph>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> PipelineError {
    PipelineError::GraphWrite("graph lock poisoned".to_string())
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn clear_codebase(&self, codebase_id: &str) -> Result<(), PipelineError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        inner.remove(codebase_id);
        Ok(())
    }

    async fn upsert_node(&self, codebase_id: &str, node: &GraphNode) -> Result<(), PipelineError> {
        super::require_keys(&[&node.key])?;
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let graph = inner.entry(codebase_id.to_string()).or_default();
        graph
            .nodes
            .insert((node.kind, node.key.clone()), node.clone());
        Ok(())
    }

    async fn upsert_edge(&self, codebase_id: &str, edge: &GraphEdge) -> Result<(), PipelineError> {
        super::require_keys(&[&edge.src_key, &edge.dst_key])?;
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let graph = inner.entry(codebase_id.to_string()).or_default();

        let (src_kind, dst_kind) = edge.kind.endpoints();
        for (kind, key) in [(src_kind, &edge.src_key), (dst_kind, &edge.dst_key)] {
            if !graph.nodes.contains_key(&(kind, key.clone())) {
                return Err(PipelineError::GraphWrite(format!(
                    "edge {} references missing {} node '{}'",
                    edge.kind.as_str(),
                    kind.as_str(),
                    key
                )));
            }
        }

        graph.edges.insert(
            (edge.kind, edge.src_key.clone(), edge.dst_key.clone()),
            edge.clone(),
        );
        Ok(())
    }

    async fn nodes_of_kind(
        &self,
        codebase_id: &str,
        kind: NodeKind,
    ) -> Result<Vec<GraphNode>, PipelineError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .get(codebase_id)
            .map(|g| {
                g.nodes
                    .range((kind, String::new())..)
                    .take_while(|((k, _), _)| *k == kind)
                    .map(|(_, node)| node.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn node(
        &self,
        codebase_id: &str,
        kind: NodeKind,
        key: &str,
    ) -> Result<Option<GraphNode>, PipelineError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .get(codebase_id)
            .and_then(|g| g.nodes.get(&(kind, key.to_string())).cloned()))
    }

    async fn edges_of_kind(
        &self,
        codebase_id: &str,
        kind: EdgeKind,
    ) -> Result<Vec<GraphEdge>, PipelineError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .get(codebase_id)
            .map(|g| {
                g.edges
                    .range((kind, String::new(), String::new())..)
                    .take_while(|((k, _, _), _)| *k == kind)
                    .map(|(_, edge)| edge.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn snapshot(&self, codebase_id: &str) -> Result<GraphSnapshot, PipelineError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut snapshot = GraphSnapshot {
            codebase_id: codebase_id.to_string(),
            ..GraphSnapshot::default()
        };
        if let Some(graph) = inner.get(codebase_id) {
            for (kind, _) in graph.nodes.keys() {
                *snapshot
                    .node_counts
                    .entry(kind.as_str().to_string())
                    .or_insert(0) += 1;
            }
            for (kind, _, _) in graph.edges.keys() {
                *snapshot
                    .edge_counts
                    .entry(kind.as_str().to_string())
                    .or_insert(0) += 1;
            }
            snapshot.total_nodes = graph.nodes.len() as u64;
            snapshot.total_edges = graph.edges.len() as u64;
        }
        Ok(snapshot)
    }

    async fn list_codebases(&self) -> Result<Vec<String>, PipelineError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut ids: Vec<String> = inner
            .iter()
            .filter(|(_, g)| !g.nodes.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(kind: NodeKind, key: &str) -> GraphNode {
        GraphNode::new(kind, key, json!({"k": key}))
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = MemoryGraph::new();
        store
            .upsert_node("repo", &node(NodeKind::Commit, "abc"))
            .await
            .unwrap();
        store
            .upsert_node("repo", &node(NodeKind::Commit, "abc"))
            .await
            .unwrap();
        let snapshot = store.snapshot("repo").await.unwrap();
        assert_eq!(snapshot.total_nodes, 1);
    }

    #[tokio::test]
    async fn empty_key_rejected() {
        let store = MemoryGraph::new();
        let err = store
            .upsert_node("repo", &node(NodeKind::Commit, " "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "graph_write");
    }

    #[tokio::test]
    async fn dangling_edge_rejected() {
        let store = MemoryGraph::new();
        store
            .upsert_node("repo", &node(NodeKind::Developer, "dev@x.com"))
            .await
            .unwrap();
        let edge = GraphEdge::new(EdgeKind::Authored, "dev@x.com", "missing-sha");
        let err = store.upsert_edge("repo", &edge).await.unwrap_err();
        assert_eq!(err.kind(), "graph_write");
    }

    #[tokio::test]
    async fn clear_is_scoped_to_one_codebase() {
        let store = MemoryGraph::new();
        store
            .upsert_node("alpha", &node(NodeKind::Codebase, "alpha"))
            .await
            .unwrap();
        store
            .upsert_node("beta", &node(NodeKind::Codebase, "beta"))
            .await
            .unwrap();
        store.clear_codebase("alpha").await.unwrap();
        assert_eq!(store.snapshot("alpha").await.unwrap().total_nodes, 0);
        assert_eq!(store.snapshot("beta").await.unwrap().total_nodes, 1);
        assert_eq!(store.list_codebases().await.unwrap(), vec!["beta"]);
    }
}
