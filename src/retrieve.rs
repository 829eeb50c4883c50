//! Context retrieval and question answering over the graph.
//!
//! A question is reduced to keywords, matched against commit, developer,
//! and milestone nodes, and the best hits are assembled into a bounded
//! plain-text context blob. The completion provider then answers from
//! that context; if it is disabled or fails, the blob itself is returned
//! so the caller still gets grounded material instead of an error.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::completion::CompletionProvider;
use crate::config::ChatConfig;
use crate::error::PipelineError;
use crate::graph::{GraphStore, NodeKind};
use crate::models::{BusinessMilestone, Developer};

const STOPWORDS: &[&str] = &[
    "what", "when", "where", "which", "this", "that", "these", "those", "they", "them", "with",
    "from", "have", "been", "were", "does", "will", "would", "could", "should", "about", "tell",
    "show", "give", "list", "many", "much", "most", "recent", "please",
];

const ANSWER_SYSTEM_PROMPT: &str = "You answer questions about a software repository using only \
the provided context. If the context does not contain the answer, say so. \
Be concise and concrete.";

/// One turn of chat history carried into the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Deserialize)]
struct CommitView {
    title: String,
    feature_summary: String,
    business_impact: String,
    author_name: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct CodebaseView {
    info: crate::models::Codebase,
}

/// Lowercased keywords longer than three characters, stopwords removed,
/// first occurrence order preserved.
pub fn extract_keywords(question: &str) -> Vec<String> {
    let mut keywords = Vec::new();
    for word in question.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.len() <= 3 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !keywords.contains(&word) {
            keywords.push(word);
        }
    }
    keywords
}

fn match_count(haystack: &str, keywords: &[String]) -> usize {
    let lower = haystack.to_lowercase();
    keywords.iter().filter(|k| lower.contains(k.as_str())).count()
}

/// Rank items by keyword hits, drop zero-hit items, keep the top `max`.
fn ranked<T>(items: Vec<(usize, T)>, max: usize) -> Vec<T> {
    let mut hits: Vec<(usize, T)> = items.into_iter().filter(|(score, _)| *score > 0).collect();
    hits.sort_by(|a, b| b.0.cmp(&a.0));
    hits.into_iter().take(max).map(|(_, item)| item).collect()
}

pub struct ContextRetriever {
    store: Arc<dyn GraphStore>,
    config: ChatConfig,
}

impl ContextRetriever {
    pub fn new(store: Arc<dyn GraphStore>, config: ChatConfig) -> Self {
        Self { store, config }
    }

    /// Assemble the grounded context blob for one question.
    pub async fn build_context(
        &self,
        codebase_id: &str,
        question: &str,
    ) -> Result<String, PipelineError> {
        let keywords = extract_keywords(question);
        debug!(?keywords, "retrieving context");

        let commit_nodes = self.store.nodes_of_kind(codebase_id, NodeKind::Commit).await?;
        let mut commit_scores: Vec<(usize, CommitView)> = Vec::new();
        for node in commit_nodes {
            if let Ok(view) = serde_json::from_value::<CommitView>(node.properties) {
                let text = format!("{} {} {}", view.title, view.feature_summary, view.business_impact);
                commit_scores.push((match_count(&text, &keywords), view));
            }
        }
        // Commits rank by keyword overlap, then recency.
        let mut commit_hits: Vec<(usize, CommitView)> = commit_scores
            .into_iter()
            .filter(|(score, _)| *score > 0)
            .collect();
        commit_hits.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.timestamp.cmp(&a.1.timestamp))
        });
        let commits: Vec<CommitView> = commit_hits
            .into_iter()
            .take(self.config.max_commits)
            .map(|(_, c)| c)
            .collect();

        let developer_nodes = self
            .store
            .nodes_of_kind(codebase_id, NodeKind::Developer)
            .await?;
        let mut developer_scores: Vec<(usize, Developer)> = Vec::new();
        for node in developer_nodes {
            if let Ok(dev) = serde_json::from_value::<Developer>(node.properties) {
                let text = format!("{} {} {}", dev.name, dev.email, dev.expertise_areas.join(" "));
                developer_scores.push((match_count(&text, &keywords), dev));
            }
        }
        // Matching developers rank by overlap, then contribution score.
        let mut developer_hits: Vec<(usize, Developer)> = developer_scores
            .into_iter()
            .filter(|(score, _)| *score > 0)
            .collect();
        developer_hits.sort_by(|a, b| {
            b.0.cmp(&a.0).then_with(|| {
                b.1.contribution_score
                    .partial_cmp(&a.1.contribution_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        let developers: Vec<Developer> = developer_hits
            .into_iter()
            .take(self.config.max_developers)
            .map(|(_, d)| d)
            .collect();

        let milestone_nodes = self
            .store
            .nodes_of_kind(codebase_id, NodeKind::Milestone)
            .await?;
        let mut milestone_scores: Vec<(usize, BusinessMilestone)> = Vec::new();
        for node in milestone_nodes {
            if let Ok(m) = serde_json::from_value::<BusinessMilestone>(node.properties) {
                let text = format!("{} {}", m.name, m.description);
                milestone_scores.push((match_count(&text, &keywords), m));
            }
        }
        let milestones = ranked(milestone_scores, self.config.max_milestones);

        let mut blob = String::new();
        if !commits.is_empty() {
            blob.push_str("=== RELEVANT COMMITS ===\n");
            for c in &commits {
                blob.push_str(&format!(
                    "- {} ({}, {}, {})\n",
                    c.title,
                    c.business_impact,
                    c.author_name,
                    c.timestamp.format("%Y-%m-%d")
                ));
            }
        }
        if !developers.is_empty() {
            blob.push_str("=== RELEVANT DEVELOPERS ===\n");
            for d in &developers {
                blob.push_str(&format!(
                    "- {} <{}>: {} commits, grade {}, expertise: {}\n",
                    d.name,
                    d.email,
                    d.total_commits,
                    d.grade,
                    if d.expertise_areas.is_empty() {
                        "none".to_string()
                    } else {
                        d.expertise_areas.join(", ")
                    }
                ));
            }
        }
        if !milestones.is_empty() {
            blob.push_str("=== RELEVANT MILESTONES ===\n");
            for m in &milestones {
                blob.push_str(&format!(
                    "- {} ({}, {})\n",
                    m.name,
                    m.milestone_type.as_str(),
                    m.date.format("%Y-%m-%d")
                ));
            }
        }

        // Nothing matched: fall back to a repository overview so the
        // answer is still grounded in real data.
        if blob.is_empty() {
            blob = self.overview(codebase_id).await?;
        }

        if blob.chars().count() > self.config.max_context_chars {
            blob = blob.chars().take(self.config.max_context_chars).collect();
        }
        Ok(blob)
    }

    async fn overview(&self, codebase_id: &str) -> Result<String, PipelineError> {
        let Some(node) = self.store.node(codebase_id, NodeKind::Codebase, codebase_id).await? else {
            return Ok(format!("No analysis data exists for '{}'.\n", codebase_id));
        };
        let mut blob = String::from("=== REPOSITORY OVERVIEW ===\n");
        if let Ok(view) = serde_json::from_value::<CodebaseView>(node.properties) {
            blob.push_str(&format!(
                "- {} ({}), default branch {}, {} commits by {} developers, analyzed {}\n",
                view.info.name,
                view.info.url,
                view.info.default_branch,
                view.info.total_commits,
                view.info.total_developers,
                view.info.last_analyzed.format("%Y-%m-%d")
            ));
        }
        Ok(blob)
    }

    /// Answer a question against one codebase's graph. Provider failures
    /// degrade to returning the context blob verbatim.
    pub async fn answer(
        &self,
        provider: &dyn CompletionProvider,
        codebase_id: &str,
        question: &str,
        history: &[ChatTurn],
    ) -> Result<String, PipelineError> {
        let context = self.build_context(codebase_id, question).await?;
        if !provider.is_enabled() {
            return Ok(context);
        }

        let mut prompt = String::new();
        prompt.push_str("Context:\n");
        prompt.push_str(&context);
        // Only the tail of the conversation, each turn clipped.
        let tail = history.len().saturating_sub(3);
        for turn in &history[tail..] {
            let clipped: String = turn.content.chars().take(200).collect();
            prompt.push_str(&format!("\n{}: {}", turn.role, clipped));
        }
        prompt.push_str(&format!("\n\nQuestion: {}\n", question));

        match provider.complete(ANSWER_SYSTEM_PROMPT, &prompt).await {
            Ok(answer) if !answer.trim().is_empty() => Ok(answer.trim().to_string()),
            Ok(_) | Err(_) => {
                debug!("completion unavailable, returning raw context");
                Ok(context)
            }
        }
    }
}
