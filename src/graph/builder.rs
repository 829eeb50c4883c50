//! Projection of one analysis run into the graph store.
//!
//! A rebuild is destructive and idempotent per codebase: stale rows are
//! cleared first, then nodes are written before the edges that reference
//! them. Writes go through a bounded retry with backoff; exhaustion
//! surfaces as a fatal `graph_write` error. One build per codebase runs
//! at a time; concurrent rebuilds of different codebases do not contend.

use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{EdgeKind, GraphEdge, GraphNode, GraphSnapshot, GraphStore, NodeKind};
use crate::error::PipelineError;
use crate::models::{
    Branch, BusinessMilestone, Codebase, Commit, Developer, FileStat, HeatmapMonth, MonthlySummary,
};

pub struct GraphBuilder {
    store: Arc<dyn GraphStore>,
    max_retries: u32,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Everything one analysis run projects into the graph.
pub struct ProjectionInput<'a> {
    pub codebase: &'a Codebase,
    pub commits: &'a [Commit],
    pub developers: &'a [Developer],
    pub branches: &'a [Branch],
    pub milestones: &'a [BusinessMilestone],
    pub monthly_summaries: &'a [MonthlySummary],
    pub heatmap: &'a [HeatmapMonth],
}

impl GraphBuilder {
    pub fn new(store: Arc<dyn GraphStore>, max_retries: u32) -> Self {
        Self {
            store,
            max_retries,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    async fn codebase_lock(&self, codebase_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(codebase_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Retry a single store write with exponential backoff. Only the
    /// final failure is surfaced.
    async fn with_retry<F, Fut>(&self, mut op: F) -> Result<(), PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), PipelineError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 < self.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt.min(5)));
                    warn!(attempt, error = %e, "graph write failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn put_node(&self, codebase_id: &str, node: GraphNode) -> Result<(), PipelineError> {
        self.with_retry(|| {
            let node = node.clone();
            async move { self.store.upsert_node(codebase_id, &node).await }
        })
        .await
    }

    async fn put_edge(&self, codebase_id: &str, edge: GraphEdge) -> Result<(), PipelineError> {
        self.with_retry(|| {
            let edge = edge.clone();
            async move { self.store.upsert_edge(codebase_id, &edge).await }
        })
        .await
    }

    /// Clear and fully rebuild one codebase's subgraph.
    pub async fn rebuild(&self, input: ProjectionInput<'_>) -> Result<GraphSnapshot, PipelineError> {
        let codebase_id = input.codebase.id.as_str();
        let lock = self.codebase_lock(codebase_id).await;
        let _guard = lock.lock().await;

        self.with_retry(|| async { self.store.clear_codebase(codebase_id).await })
            .await?;

        // Root node carries the rollups the read surfaces need.
        self.put_node(
            codebase_id,
            GraphNode::new(
                NodeKind::Codebase,
                codebase_id,
                json!({
                    "info": input.codebase,
                    "monthly_summaries": input.monthly_summaries,
                    "heatmap": input.heatmap,
                }),
            ),
        )
        .await?;

        for developer in input.developers {
            self.put_node(
                codebase_id,
                GraphNode::new(
                    NodeKind::Developer,
                    &developer.email,
                    serde_json::to_value(developer).map_err(|e| {
                        PipelineError::GraphWrite(format!("unserializable developer: {}", e))
                    })?,
                ),
            )
            .await?;
            self.put_edge(
                codebase_id,
                GraphEdge::new(EdgeKind::HasDeveloper, codebase_id, &developer.email),
            )
            .await?;
        }

        let walked: std::collections::HashSet<&str> =
            input.commits.iter().map(|c| c.raw.sha.as_str()).collect();

        // Commits are newest first, so the first touch recorded for a
        // file is its most recent one.
        let mut file_nodes: HashMap<&str, GraphNode> = HashMap::new();
        for commit in input.commits {
            let raw = &commit.raw;
            self.put_node(
                codebase_id,
                GraphNode::new(
                    NodeKind::Commit,
                    &raw.sha,
                    json!({
                        "sha": raw.sha,
                        "title": raw.title(100),
                        "feature_summary": commit.feature_summary,
                        "business_impact": commit.business_impact,
                        "complexity_score": commit.complexity_score,
                        "author_name": raw.author_name,
                        "author_email": raw.author_email.trim().to_lowercase(),
                        "timestamp": raw.timestamp,
                        "insertions": raw.insertions,
                        "deletions": raw.deletions,
                        "files_changed": raw.changes.len(),
                        "is_merge": raw.parents.len() > 1,
                    }),
                ),
            )
            .await?;
            self.put_edge(
                codebase_id,
                GraphEdge::new(EdgeKind::ContainsCommit, codebase_id, &raw.sha),
            )
            .await?;
            self.put_edge(
                codebase_id,
                GraphEdge::new(
                    EdgeKind::Authored,
                    raw.author_email.trim().to_lowercase(),
                    &raw.sha,
                ),
            )
            .await?;

            for change in &raw.changes {
                file_nodes.entry(change.path.as_str()).or_insert_with(|| {
                    let extension = change
                        .path
                        .rsplit('/')
                        .next()
                        .and_then(|name| name.rsplit_once('.'))
                        .map(|(_, ext)| ext.to_string())
                        .unwrap_or_default();
                    let stat = FileStat {
                        path: change.path.clone(),
                        extension,
                        last_touched_sha: raw.sha.clone(),
                    };
                    GraphNode::new(
                        NodeKind::File,
                        &change.path,
                        serde_json::to_value(&stat).unwrap_or(serde_json::Value::Null),
                    )
                });
            }
        }

        for node in file_nodes.into_values() {
            self.put_node(codebase_id, node).await?;
        }
        for commit in input.commits {
            for change in &commit.raw.changes {
                self.put_edge(
                    codebase_id,
                    GraphEdge::new(EdgeKind::Modifies, &commit.raw.sha, &change.path)
                        .with_properties(json!({
                            "insertions": change.insertions,
                            "deletions": change.deletions,
                        })),
                )
                .await?;
            }
            // Ancestry edges stay within the walked slice; a parent cut
            // off by the history cap has no node to point at.
            for parent in &commit.raw.parents {
                if walked.contains(parent.as_str()) {
                    self.put_edge(
                        codebase_id,
                        GraphEdge::new(EdgeKind::ParentOf, parent, &commit.raw.sha),
                    )
                    .await?;
                }
            }
        }

        for branch in input.branches {
            self.put_node(
                codebase_id,
                GraphNode::new(
                    NodeKind::Branch,
                    &branch.name,
                    serde_json::to_value(branch).map_err(|e| {
                        PipelineError::GraphWrite(format!("unserializable branch: {}", e))
                    })?,
                ),
            )
            .await?;
            self.put_edge(
                codebase_id,
                GraphEdge::new(EdgeKind::HasBranch, codebase_id, &branch.name),
            )
            .await?;
        }

        for milestone in input.milestones {
            let key = milestone.dedup_key();
            self.put_node(
                codebase_id,
                GraphNode::new(
                    NodeKind::Milestone,
                    &key,
                    serde_json::to_value(milestone).map_err(|e| {
                        PipelineError::GraphWrite(format!("unserializable milestone: {}", e))
                    })?,
                ),
            )
            .await?;
            self.put_edge(
                codebase_id,
                GraphEdge::new(EdgeKind::HasMilestone, codebase_id, &key),
            )
            .await?;
            for sha in &milestone.related_commits {
                if walked.contains(sha.as_str()) {
                    self.put_edge(
                        codebase_id,
                        GraphEdge::new(EdgeKind::RelatesTo, &key, sha),
                    )
                    .await?;
                }
            }
        }

        let snapshot = self.store.snapshot(codebase_id).await?;
        info!(
            codebase = codebase_id,
            nodes = snapshot.total_nodes,
            edges = snapshot.total_edges,
            "graph rebuild complete"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;
    use crate::models::{complexity_score, BusinessImpact, FileChange, RawCommit};
    use chrono::Utc;

    fn sample_commit(sha: &str, email: &str, path: &str) -> Commit {
        let raw = RawCommit {
            sha: sha.into(),
            message: "Add things".into(),
            author_name: "Dev".into(),
            author_email: email.into(),
            timestamp: Utc::now(),
            parents: vec![],
            changes: vec![FileChange {
                path: path.into(),
                insertions: 3,
                deletions: 1,
            }],
            insertions: 3,
            deletions: 1,
        };
        Commit {
            feature_summary: raw.title(100),
            business_impact: BusinessImpact::Feature,
            complexity_score: complexity_score(3, 1, 1),
            raw,
        }
    }

    fn sample_developer(email: &str) -> Developer {
        Developer {
            email: email.into(),
            name: "Dev".into(),
            aliases: vec![],
            expertise_areas: vec!["Backend".into()],
            total_commits: 1,
            lines_added: 3,
            lines_removed: 1,
            productivity_score: 100.0,
            impact_score: 100.0,
            consistency_score: 2.0,
            collaboration_score: 25.0,
            contribution_score: 56.75,
            grade: "C+".into(),
        }
    }

    fn sample_codebase() -> Codebase {
        Codebase {
            id: "repo".into(),
            url: "https://example.com/org/repo".into(),
            name: "repo".into(),
            default_branch: "main".into(),
            total_commits: 2,
            total_developers: 1,
            last_analyzed: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rebuild_writes_full_schema() {
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraph::new());
        let builder = GraphBuilder::new(Arc::clone(&store), 3);
        let codebase = sample_codebase();
        let commits = vec![
            sample_commit("c2", "dev@x.com", "src/lib.rs"),
            sample_commit("c1", "dev@x.com", "src/lib.rs"),
        ];
        let developers = vec![sample_developer("dev@x.com")];
        let branches = vec![Branch {
            name: "main".into(),
            head_sha: "c2".into(),
        }];

        let snapshot = builder
            .rebuild(ProjectionInput {
                codebase: &codebase,
                commits: &commits,
                developers: &developers,
                branches: &branches,
                milestones: &[],
                monthly_summaries: &[],
                heatmap: &[],
            })
            .await
            .unwrap();

        assert_eq!(snapshot.node_counts["codebase"], 1);
        assert_eq!(snapshot.node_counts["commit"], 2);
        assert_eq!(snapshot.node_counts["developer"], 1);
        assert_eq!(snapshot.node_counts["file"], 1);
        assert_eq!(snapshot.edge_counts["contains_commit"], 2);
        assert_eq!(snapshot.edge_counts["authored"], 2);
        assert_eq!(snapshot.edge_counts["modifies"], 2);

        // Newest commit owns the file's last touch.
        let file = store
            .node("repo", NodeKind::File, "src/lib.rs")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.properties["last_touched_sha"], "c2");
    }

    #[tokio::test]
    async fn rebuild_converges_instead_of_duplicating() {
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraph::new());
        let builder = GraphBuilder::new(Arc::clone(&store), 3);
        let codebase = sample_codebase();
        let commits = vec![sample_commit("c1", "dev@x.com", "src/lib.rs")];
        let developers = vec![sample_developer("dev@x.com")];

        for _ in 0..2 {
            builder
                .rebuild(ProjectionInput {
                    codebase: &codebase,
                    commits: &commits,
                    developers: &developers,
                    branches: &[],
                    milestones: &[],
                    monthly_summaries: &[],
                    heatmap: &[],
                })
                .await
                .unwrap();
        }
        let snapshot = store.snapshot("repo").await.unwrap();
        assert_eq!(snapshot.total_nodes, 4);
        assert_eq!(snapshot.edge_counts["contains_commit"], 1);
    }
}
