//! Core data models for the analysis pipeline.
//!
//! These types flow from extraction (raw commit records) through
//! classification, aggregation, and graph projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One analyzed repository identity. `id` is the normalized repository
/// URL and scopes the graph; `name` is the display name taken from the
/// URL tail and may collide across repositories. Stats are overwritten
/// (not accumulated) on re-analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebase {
    pub id: String,
    pub url: String,
    pub name: String,
    pub default_branch: String,
    pub total_commits: u64,
    pub total_developers: u64,
    pub last_analyzed: DateTime<Utc>,
}

/// Per-file diff stats for one commit touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub insertions: u64,
    pub deletions: u64,
}

/// A raw commit record as read from version-control history, before
/// classification.
#[derive(Debug, Clone)]
pub struct RawCommit {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    /// Ordered parent SHAs; more than one for merge commits.
    pub parents: Vec<String>,
    pub changes: Vec<FileChange>,
    pub insertions: u64,
    pub deletions: u64,
}

impl RawCommit {
    /// First line of the commit message, truncated to `max` characters.
    pub fn title(&self, max: usize) -> String {
        self.message
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(max)
            .collect()
    }
}

/// Fixed business-impact category set. Every classified commit carries
/// exactly one of these, even with the completion provider unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessImpact {
    Feature,
    BugFix,
    Performance,
    Security,
    Other,
}

impl BusinessImpact {
    pub const ALL: [BusinessImpact; 5] = [
        BusinessImpact::Feature,
        BusinessImpact::BugFix,
        BusinessImpact::Performance,
        BusinessImpact::Security,
        BusinessImpact::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessImpact::Feature => "feature",
            BusinessImpact::BugFix => "bug_fix",
            BusinessImpact::Performance => "performance",
            BusinessImpact::Security => "security",
            BusinessImpact::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "feature" => Some(BusinessImpact::Feature),
            "bug_fix" | "bugfix" | "bug fix" => Some(BusinessImpact::BugFix),
            "performance" => Some(BusinessImpact::Performance),
            "security" => Some(BusinessImpact::Security),
            "other" => Some(BusinessImpact::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for BusinessImpact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A commit after classification: the raw record plus derived fields.
#[derive(Debug, Clone)]
pub struct Commit {
    pub raw: RawCommit,
    pub feature_summary: String,
    pub business_impact: BusinessImpact,
    pub complexity_score: f64,
}

/// Commit complexity: monotonic in total churn and file count, capped at 10.
pub fn complexity_score(insertions: u64, deletions: u64, file_count: usize) -> f64 {
    let churn = (insertions + deletions) as f64;
    (churn * 0.1 + file_count as f64 * 0.5).min(10.0)
}

/// A developer aggregated over one analysis run. Identity is the
/// lowercased author email; `name` is the first display name seen and
/// `aliases` collects the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Developer {
    pub email: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub expertise_areas: Vec<String>,
    pub total_commits: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub productivity_score: f64,
    pub impact_score: f64,
    pub consistency_score: f64,
    pub collaboration_score: f64,
    pub contribution_score: f64,
    pub grade: String,
}

/// A touched file within the codebase. Identity is the path; per-touch
/// diff stats live on the MODIFIES edge, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    pub path: String,
    pub extension: String,
    pub last_touched_sha: String,
}

/// A branch snapshot taken at analysis time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub head_sha: String,
}

/// A tag reference snapshot (input to milestone detection).
#[derive(Debug, Clone)]
pub struct TagRef {
    pub name: String,
    pub target_sha: String,
    pub timestamp: DateTime<Utc>,
}

/// Milestone kind, ordered by detection precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneType {
    Release,
    Launch,
    Beta,
    Generic,
}

impl MilestoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneType::Release => "release",
            MilestoneType::Launch => "launch",
            MilestoneType::Beta => "beta",
            MilestoneType::Generic => "generic",
        }
    }
}

/// A detected release-like marker tied to specific commits.
///
/// Identity is `(date, version)` when a version is present, otherwise
/// `(date, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessMilestone {
    pub name: String,
    pub description: String,
    pub milestone_type: MilestoneType,
    pub version: Option<String>,
    pub date: DateTime<Utc>,
    pub related_commits: Vec<String>,
}

impl BusinessMilestone {
    /// Deduplication key: day-granular date plus version (or name).
    pub fn dedup_key(&self) -> String {
        let day = self.date.format("%Y-%m-%d");
        match &self.version {
            Some(v) => format!("{}|v|{}", day, v),
            None => format!("{}|n|{}", day, self.name),
        }
    }
}

/// Relative activity level for one heatmap month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    High,
    Medium,
    Low,
}

/// One month in the trailing-12-month activity heatmap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapMonth {
    /// `YYYY-MM` key.
    pub month_key: String,
    pub commit_count: u64,
    pub activity_level: ActivityLevel,
}

/// Monthly business summary bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlySummary {
    pub year: i32,
    pub month: u32,
    /// `YYYY-MM` key.
    pub month_key: String,
    pub total_commits: u64,
    /// Sorted unique author emails.
    pub unique_authors: Vec<String>,
    pub author_count: u64,
    pub insertions: u64,
    pub deletions: u64,
    pub net_changes: i64,
    /// Distinct impact categories present this month.
    pub business_impacts: Vec<BusinessImpact>,
    pub features_added: Vec<String>,
    pub bugs_fixed: Vec<String>,
    pub performance_improvements: Vec<String>,
}
