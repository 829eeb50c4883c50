//! Knowledge-graph schema and store capability.
//!
//! The graph is a typed property graph scoped per codebase. Node and edge
//! kinds are a closed set; writes that violate the endpoint schema are
//! rejected with a `graph_write` error before touching storage.
//!
//! Two stores ship: [`MemoryGraph`] for tests and [`SqliteGraph`] for
//! durable state shared across CLI invocations. Both have idempotent
//! upsert semantics keyed on stable identity, so rebuilding the same
//! history converges instead of duplicating.

mod builder;
mod memory;
mod sqlite;

pub use builder::{GraphBuilder, ProjectionInput};
pub use memory::MemoryGraph;
pub use sqlite::SqliteGraph;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Codebase,
    Commit,
    Developer,
    File,
    Branch,
    Milestone,
}

impl NodeKind {
    pub const ALL: [NodeKind; 6] = [
        NodeKind::Codebase,
        NodeKind::Commit,
        NodeKind::Developer,
        NodeKind::File,
        NodeKind::Branch,
        NodeKind::Milestone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Codebase => "codebase",
            NodeKind::Commit => "commit",
            NodeKind::Developer => "developer",
            NodeKind::File => "file",
            NodeKind::Branch => "branch",
            NodeKind::Milestone => "milestone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    ContainsCommit,
    HasDeveloper,
    HasBranch,
    HasMilestone,
    Authored,
    ParentOf,
    Modifies,
    RelatesTo,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 8] = [
        EdgeKind::ContainsCommit,
        EdgeKind::HasDeveloper,
        EdgeKind::HasBranch,
        EdgeKind::HasMilestone,
        EdgeKind::Authored,
        EdgeKind::ParentOf,
        EdgeKind::Modifies,
        EdgeKind::RelatesTo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::ContainsCommit => "contains_commit",
            EdgeKind::HasDeveloper => "has_developer",
            EdgeKind::HasBranch => "has_branch",
            EdgeKind::HasMilestone => "has_milestone",
            EdgeKind::Authored => "authored",
            EdgeKind::ParentOf => "parent_of",
            EdgeKind::Modifies => "modifies",
            EdgeKind::RelatesTo => "relates_to",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    /// The only legal `(source, destination)` node kinds for this edge.
    pub fn endpoints(&self) -> (NodeKind, NodeKind) {
        match self {
            EdgeKind::ContainsCommit => (NodeKind::Codebase, NodeKind::Commit),
            EdgeKind::HasDeveloper => (NodeKind::Codebase, NodeKind::Developer),
            EdgeKind::HasBranch => (NodeKind::Codebase, NodeKind::Branch),
            EdgeKind::HasMilestone => (NodeKind::Codebase, NodeKind::Milestone),
            EdgeKind::Authored => (NodeKind::Developer, NodeKind::Commit),
            EdgeKind::ParentOf => (NodeKind::Commit, NodeKind::Commit),
            EdgeKind::Modifies => (NodeKind::Commit, NodeKind::File),
            EdgeKind::RelatesTo => (NodeKind::Milestone, NodeKind::Commit),
        }
    }
}

/// One typed node. `key` is unique within `(codebase, kind)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub kind: NodeKind,
    pub key: String,
    pub properties: serde_json::Value,
}

impl GraphNode {
    pub fn new(kind: NodeKind, key: impl Into<String>, properties: serde_json::Value) -> Self {
        Self {
            kind,
            key: key.into(),
            properties,
        }
    }
}

/// One typed edge between two node keys. Identity is the full
/// `(kind, src, dst)` triple within a codebase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub kind: EdgeKind,
    pub src_key: String,
    pub dst_key: String,
    pub properties: serde_json::Value,
}

impl GraphEdge {
    pub fn new(kind: EdgeKind, src_key: impl Into<String>, dst_key: impl Into<String>) -> Self {
        Self {
            kind,
            src_key: src_key.into(),
            dst_key: dst_key.into(),
            properties: serde_json::Value::Null,
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Counts-only view of one codebase's graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub codebase_id: String,
    pub node_counts: BTreeMap<String, u64>,
    pub edge_counts: BTreeMap<String, u64>,
    pub total_nodes: u64,
    pub total_edges: u64,
}

/// Full dump of one codebase's graph plus its stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphEdge>,
    pub stats: GraphSnapshot,
}

/// Identity keys must be non-empty; an empty key would collapse
/// distinct records under upsert.
pub(crate) fn require_keys(keys: &[&str]) -> Result<(), PipelineError> {
    if keys.iter().any(|k| k.trim().is_empty()) {
        return Err(PipelineError::GraphWrite("empty identity key".to_string()));
    }
    Ok(())
}

/// Storage capability for the knowledge graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Drop every node and edge scoped to `codebase_id`. Other codebases
    /// in the same store are untouched.
    async fn clear_codebase(&self, codebase_id: &str) -> Result<(), PipelineError>;

    /// Insert or overwrite a node keyed on `(codebase, kind, key)`.
    async fn upsert_node(&self, codebase_id: &str, node: &GraphNode) -> Result<(), PipelineError>;

    /// Insert or overwrite an edge keyed on `(codebase, kind, src, dst)`.
    /// Both endpoint nodes must already exist with the kinds the edge's
    /// schema names; a dangling reference is a `graph_write` error.
    async fn upsert_edge(&self, codebase_id: &str, edge: &GraphEdge) -> Result<(), PipelineError>;

    /// All nodes of one kind, sorted by key.
    async fn nodes_of_kind(
        &self,
        codebase_id: &str,
        kind: NodeKind,
    ) -> Result<Vec<GraphNode>, PipelineError>;

    /// Single node lookup.
    async fn node(
        &self,
        codebase_id: &str,
        kind: NodeKind,
        key: &str,
    ) -> Result<Option<GraphNode>, PipelineError>;

    /// All edges of one kind, sorted by `(src, dst)`.
    async fn edges_of_kind(
        &self,
        codebase_id: &str,
        kind: EdgeKind,
    ) -> Result<Vec<GraphEdge>, PipelineError>;

    async fn snapshot(&self, codebase_id: &str) -> Result<GraphSnapshot, PipelineError>;

    /// Identifiers of every codebase with at least one node.
    async fn list_codebases(&self) -> Result<Vec<String>, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_roundtrip() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
        for kind in EdgeKind::ALL {
            assert_eq!(EdgeKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn endpoint_schema_is_closed() {
        assert_eq!(
            EdgeKind::Authored.endpoints(),
            (NodeKind::Developer, NodeKind::Commit)
        );
        assert_eq!(
            EdgeKind::Modifies.endpoints(),
            (NodeKind::Commit, NodeKind::File)
        );
        assert_eq!(
            EdgeKind::ParentOf.endpoints(),
            (NodeKind::Commit, NodeKind::Commit)
        );
        assert_eq!(
            EdgeKind::RelatesTo.endpoints(),
            (NodeKind::Milestone, NodeKind::Commit)
        );
        for kind in [
            EdgeKind::ContainsCommit,
            EdgeKind::HasDeveloper,
            EdgeKind::HasBranch,
            EdgeKind::HasMilestone,
        ] {
            assert_eq!(kind.endpoints().0, NodeKind::Codebase);
        }
    }
}
