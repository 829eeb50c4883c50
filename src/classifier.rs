//! Per-commit business-impact classification.
//!
//! Each raw commit is classified into exactly one [`BusinessImpact`]
//! category and given a one-line feature summary. The completion provider
//! is asked first; on timeout, empty content, or any provider failure the
//! deterministic keyword heuristic takes over, so classification never
//! fails a job.
//!
//! Classification fans out over a bounded worker pool and the phase ends
//! only when every commit has a result. Output order matches input order
//! regardless of completion order.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::completion::CompletionProvider;
use crate::config::ClassifierConfig;
use crate::error::PipelineError;
use crate::models::{complexity_score, BusinessImpact, Commit, RawCommit};

const SUMMARY_MAX_CHARS: usize = 100;

const SYSTEM_PROMPT: &str = "You are an assistant that classifies version-control commits by \
business impact. Respond with a JSON object with two keys: \"impact\" \
(one of: feature, bug_fix, performance, security, other) and \"summary\" \
(one short sentence describing the change in business terms).";

/// Keyword tables checked in order; the first matching table wins.
const IMPACT_KEYWORDS: &[(BusinessImpact, &[&str])] = &[
    (BusinessImpact::BugFix, &["fix", "bug", "patch"]),
    (BusinessImpact::Feature, &["add", "implement", "introduce"]),
    (BusinessImpact::Performance, &["perf", "optimi", "speed"]),
    (BusinessImpact::Security, &["security", "vuln"]),
];

/// Heuristic classification from the commit message alone.
pub fn classify_heuristic(message: &str) -> BusinessImpact {
    let lower = message.to_lowercase();
    for (impact, keywords) in IMPACT_KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *impact;
        }
    }
    BusinessImpact::Other
}

#[derive(Deserialize)]
struct ClassifierReply {
    impact: String,
    #[serde(default)]
    summary: String,
}

fn build_prompt(commit: &RawCommit) -> String {
    let mut files: Vec<&str> = commit.changes.iter().map(|c| c.path.as_str()).collect();
    files.truncate(10);
    format!(
        "Commit message:\n{}\n\nFiles changed ({}): {}\nLines: +{} -{}",
        commit.title(200),
        commit.changes.len(),
        files.join(", "),
        commit.insertions,
        commit.deletions
    )
}

/// Parse the provider's reply. Strict JSON first, then a lenient scan for
/// a category token anywhere in the text.
fn parse_reply(text: &str, commit: &RawCommit) -> Option<(BusinessImpact, String)> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Models sometimes wrap JSON in a code fence.
    let inner = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if let Ok(reply) = serde_json::from_str::<ClassifierReply>(inner) {
        if let Some(impact) = BusinessImpact::parse(&reply.impact) {
            let summary = if reply.summary.trim().is_empty() {
                commit.title(SUMMARY_MAX_CHARS)
            } else {
                reply.summary.trim().chars().take(SUMMARY_MAX_CHARS).collect()
            };
            return Some((impact, summary));
        }
    }
    let lower = inner.to_lowercase();
    BusinessImpact::ALL
        .iter()
        .find(|i| lower.contains(i.as_str()))
        .map(|i| (*i, commit.title(SUMMARY_MAX_CHARS)))
}

/// Classify one commit: provider first when enabled, heuristic otherwise
/// or on any failure.
async fn classify_one(
    provider: &dyn CompletionProvider,
    config: &ClassifierConfig,
    raw: RawCommit,
) -> Commit {
    let impact_and_summary = if provider.is_enabled() {
        match attempt_provider(provider, config, &raw).await {
            Ok(pair) => Some(pair),
            Err(e) => {
                debug!(sha = %raw.sha, kind = e.kind(), "falling back to heuristic classification");
                None
            }
        }
    } else {
        None
    };

    let (business_impact, feature_summary) = impact_and_summary.unwrap_or_else(|| {
        (
            classify_heuristic(&raw.message),
            raw.title(SUMMARY_MAX_CHARS),
        )
    });

    let complexity = complexity_score(raw.insertions, raw.deletions, raw.changes.len());
    Commit {
        raw,
        feature_summary,
        business_impact,
        complexity_score: complexity,
    }
}

async fn attempt_provider(
    provider: &dyn CompletionProvider,
    config: &ClassifierConfig,
    raw: &RawCommit,
) -> Result<(BusinessImpact, String), PipelineError> {
    let prompt = build_prompt(raw);
    let deadline = Duration::from_secs(config.timeout_secs);
    let text = tokio::time::timeout(deadline, provider.complete(SYSTEM_PROMPT, &prompt))
        .await
        .map_err(|_| PipelineError::ClassificationTimeout {
            sha: raw.sha.clone(),
            timeout_secs: config.timeout_secs,
        })??;

    parse_reply(&text, raw).ok_or_else(|| PipelineError::ClassificationEmpty {
        sha: raw.sha.clone(),
    })
}

/// Classify all commits over a bounded worker pool. Returns one [`Commit`]
/// per input, in input order; this is the join barrier for the phase.
pub async fn classify_commits(
    provider: Arc<dyn CompletionProvider>,
    config: &ClassifierConfig,
    commits: Vec<RawCommit>,
) -> Vec<Commit> {
    let semaphore = Arc::new(Semaphore::new(config.workers));
    let mut set = JoinSet::new();

    for (index, raw) in commits.into_iter().enumerate() {
        let provider = Arc::clone(&provider);
        let config = config.clone();
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            // Closing the semaphore is never done here, so acquire only
            // fails if the pool itself is torn down.
            let _permit = semaphore.acquire().await;
            (index, classify_one(provider.as_ref(), &config, raw).await)
        });
    }

    let mut slots: Vec<Option<Commit>> = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, commit)) => {
                if slots.len() <= index {
                    slots.resize_with(index + 1, || None);
                }
                slots[index] = Some(commit);
            }
            Err(e) => warn!(error = %e, "classification task panicked"),
        }
    }
    slots.into_iter().flatten().collect()
}
