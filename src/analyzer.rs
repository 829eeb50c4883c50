//! Pipeline orchestration and the public analysis surface.
//!
//! [`Analyzer`] wires the capabilities together and drives one analysis
//! run through the job phases: clone, extract, classify, aggregate,
//! build graph. Every read surface (snapshot, scorecards, timeline,
//! chat) goes through the graph store, so separate invocations see the
//! same state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::classifier::classify_commits;
use crate::completion::CompletionProvider;
use crate::config::Config;
use crate::error::PipelineError;
use crate::expertise::{build_developers, rank_developers, ScoreField};
use crate::git::{normalize_url, repo_name, VcsReader};
use crate::graph::{
    EdgeKind, GraphBuilder, GraphExport, GraphSnapshot, GraphStore, NodeKind, ProjectionInput,
};
use crate::job::{JobPhase, JobRecord, JobTracker};
use crate::milestones::detect_milestones;
use crate::models::{
    Branch, BusinessMilestone, Codebase, Commit, Developer, HeatmapMonth, MonthlySummary,
    RawCommit, TagRef,
};
use crate::retrieve::{ChatTurn, ContextRetriever};

/// Aggregated read view for the timeline surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessTimeline {
    pub monthly_summaries: Vec<MonthlySummary>,
    pub milestones: Vec<BusinessMilestone>,
    pub heatmap: Vec<HeatmapMonth>,
}

/// Result of one completed analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub job_id: Uuid,
    pub codebase: Codebase,
    pub snapshot: GraphSnapshot,
}

#[derive(Deserialize)]
struct CodebaseNodeView {
    info: Codebase,
    #[serde(default)]
    monthly_summaries: Vec<MonthlySummary>,
    #[serde(default)]
    heatmap: Vec<HeatmapMonth>,
}

pub struct Analyzer {
    config: Config,
    reader: Arc<dyn VcsReader>,
    provider: Arc<dyn CompletionProvider>,
    builder: GraphBuilder,
    jobs: Arc<JobTracker>,
    retriever: ContextRetriever,
}

impl Analyzer {
    pub fn new(
        config: Config,
        reader: Arc<dyn VcsReader>,
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn GraphStore>,
    ) -> Self {
        let builder = GraphBuilder::new(Arc::clone(&store), config.graph.max_retries);
        let jobs = Arc::new(JobTracker::new(std::time::Duration::from_secs(
            config.jobs.retention_secs,
        )));
        let retriever = ContextRetriever::new(Arc::clone(&store), config.chat.clone());
        Self {
            config,
            reader,
            provider,
            builder,
            jobs,
            retriever,
        }
    }

    pub fn jobs(&self) -> &Arc<JobTracker> {
        &self.jobs
    }

    /// Run a full analysis to completion, tracked as a job.
    #[instrument(skip(self, max_commits))]
    pub async fn analyze(
        &self,
        url: &str,
        max_commits: Option<usize>,
    ) -> Result<AnalysisOutcome, PipelineError> {
        self.jobs.purge_expired(chrono::Utc::now());
        let job_id = self.jobs.create(url)?;
        match self.run_pipeline(job_id, url, max_commits).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.jobs.fail(job_id, &e);
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        job_id: Uuid,
        url: &str,
        max_commits: Option<usize>,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let limit = max_commits.unwrap_or(self.config.git.max_commits);
        // The normalized URL is the graph scope key; the URL tail is a
        // display name and may collide across repositories.
        let normalized = normalize_url(url);

        self.jobs.advance(job_id, JobPhase::Cloning)?;
        let reader = Arc::clone(&self.reader);
        let open_url = url.to_string();
        let handle = tokio::task::spawn_blocking(move || reader.open(&open_url, None))
            .await
            .map_err(|e| PipelineError::RepositoryAccess(format!("clone task failed: {}", e)))??;

        self.jobs.advance(job_id, JobPhase::Extracting)?;
        let reader = Arc::clone(&self.reader);
        let extract_handle = handle.clone();
        let (raw_commits, branches, tags) = tokio::task::spawn_blocking(
            move || -> Result<(Vec<RawCommit>, Vec<Branch>, Vec<TagRef>), PipelineError> {
                let raw = reader.walk_history(&extract_handle, limit)?;
                let branches = reader.branches(&extract_handle)?;
                let tags = reader.tags(&extract_handle)?;
                Ok((raw, branches, tags))
            },
        )
        .await
        .map_err(|e| PipelineError::RepositoryAccess(format!("extract task failed: {}", e)))??;
        info!(
            commits = raw_commits.len(),
            branches = branches.len(),
            tags = tags.len(),
            "history extracted"
        );

        self.jobs.check_cancelled(job_id)?;
        self.jobs.advance(job_id, JobPhase::Classifying)?;
        let commits: Vec<Commit> = classify_commits(
            Arc::clone(&self.provider),
            &self.config.classifier,
            raw_commits,
        )
        .await;

        self.jobs.check_cancelled(job_id)?;
        self.jobs.advance(job_id, JobPhase::Aggregating)?;
        let developers = build_developers(&commits, &self.config.expertise);
        let monthly = crate::aggregate::monthly_summaries(&commits);
        let heatmap = crate::aggregate::activity_heatmap(&commits);
        let milestones = detect_milestones(&commits, &tags);

        let codebase = Codebase {
            id: normalized.clone(),
            url: normalized,
            name: repo_name(url),
            default_branch: handle.default_branch.clone(),
            total_commits: commits.len() as u64,
            total_developers: developers.len() as u64,
            last_analyzed: chrono::Utc::now(),
        };

        self.jobs.check_cancelled(job_id)?;
        self.jobs.advance(job_id, JobPhase::BuildingGraph)?;
        let snapshot = self
            .builder
            .rebuild(ProjectionInput {
                codebase: &codebase,
                commits: &commits,
                developers: &developers,
                branches: &branches,
                milestones: &milestones,
                monthly_summaries: &monthly,
                heatmap: &heatmap,
            })
            .await?;

        self.jobs.advance(job_id, JobPhase::Completed)?;
        Ok(AnalysisOutcome {
            job_id,
            codebase,
            snapshot,
        })
    }

    pub fn get_job_status(&self, job_id: Uuid) -> Option<JobRecord> {
        self.jobs.get(job_id)
    }

    pub fn cancel_job(&self, job_id: Uuid) -> bool {
        self.jobs.cancel(job_id)
    }

    /// Counts-only view of one codebase's graph. `codebase` is the URL
    /// (or local path) passed to `analyze`, in any equivalent spelling.
    pub async fn get_graph_stats(&self, codebase: &str) -> Result<GraphSnapshot, PipelineError> {
        self.builder.store().snapshot(&normalize_url(codebase)).await
    }

    /// Full nodes-and-relationships dump plus stats. History is bounded
    /// by the commit cap, so the dump is too.
    pub async fn get_graph_snapshot(
        &self,
        codebase: &str,
    ) -> Result<GraphExport, PipelineError> {
        let codebase_id = normalize_url(codebase);
        let store = self.builder.store();
        let mut nodes = Vec::new();
        for kind in NodeKind::ALL {
            nodes.extend(store.nodes_of_kind(&codebase_id, kind).await?);
        }
        let mut relationships = Vec::new();
        for kind in EdgeKind::ALL {
            relationships.extend(store.edges_of_kind(&codebase_id, kind).await?);
        }
        let stats = store.snapshot(&codebase_id).await?;
        Ok(GraphExport {
            nodes,
            relationships,
            stats,
        })
    }

    pub async fn list_codebases(&self) -> Result<Vec<String>, PipelineError> {
        self.builder.store().list_codebases().await
    }

    /// Developer scorecards ranked by the chosen score field, descending.
    pub async fn get_developer_scorecards(
        &self,
        codebase: &str,
        sort_by: ScoreField,
    ) -> Result<Vec<Developer>, PipelineError> {
        let nodes = self
            .builder
            .store()
            .nodes_of_kind(&normalize_url(codebase), NodeKind::Developer)
            .await?;
        // Node keys are emails, so the pre-rank order is deterministic.
        let mut developers: Vec<Developer> = nodes
            .into_iter()
            .filter_map(|n| serde_json::from_value(n.properties).ok())
            .collect();
        rank_developers(&mut developers, sort_by);
        Ok(developers)
    }

    /// Monthly summaries, milestones, and the activity heatmap.
    pub async fn get_business_timeline(
        &self,
        codebase: &str,
    ) -> Result<BusinessTimeline, PipelineError> {
        let codebase_id = normalize_url(codebase);
        let root = self
            .builder
            .store()
            .node(&codebase_id, NodeKind::Codebase, &codebase_id)
            .await?
            .ok_or_else(|| {
                PipelineError::GraphWrite(format!("no analysis exists for '{}'", codebase_id))
            })?;
        let view: CodebaseNodeView = serde_json::from_value(root.properties)
            .map_err(|e| PipelineError::GraphWrite(format!("corrupt codebase node: {}", e)))?;

        let milestone_nodes = self
            .builder
            .store()
            .nodes_of_kind(&codebase_id, NodeKind::Milestone)
            .await?;
        let mut milestones: Vec<BusinessMilestone> = milestone_nodes
            .into_iter()
            .filter_map(|n| serde_json::from_value(n.properties).ok())
            .collect();
        milestones.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.name.cmp(&b.name)));

        Ok(BusinessTimeline {
            monthly_summaries: view.monthly_summaries,
            milestones,
            heatmap: view.heatmap,
        })
    }

    /// Codebase record as stored by the last analysis.
    pub async fn get_codebase(&self, codebase: &str) -> Result<Option<Codebase>, PipelineError> {
        let codebase_id = normalize_url(codebase);
        let node = self
            .builder
            .store()
            .node(&codebase_id, NodeKind::Codebase, &codebase_id)
            .await?;
        Ok(node.and_then(|n| {
            serde_json::from_value::<CodebaseNodeView>(n.properties)
                .ok()
                .map(|v| v.info)
        }))
    }

    /// Context-grounded question answering.
    pub async fn answer_question(
        &self,
        codebase: &str,
        question: &str,
        history: &[ChatTurn],
    ) -> Result<String, PipelineError> {
        let codebase_id = normalize_url(codebase);
        self.retriever
            .answer(self.provider.as_ref(), &codebase_id, question, history)
            .await
    }
}
