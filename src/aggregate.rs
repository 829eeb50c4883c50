//! Calendar aggregation: monthly business summaries and the trailing
//! twelve-month activity heatmap.

use chrono::Datelike;
use std::collections::BTreeMap;

use crate::models::{ActivityLevel, BusinessImpact, Commit, HeatmapMonth, MonthlySummary};

/// Per-category caps on highlight lists in each monthly bucket.
const MAX_FEATURES_PER_MONTH: usize = 5;
const MAX_BUGS_PER_MONTH: usize = 5;
const MAX_PERF_PER_MONTH: usize = 3;

fn month_key(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

/// Group classified commits into per-month summaries, oldest first.
/// Months with no commits produce no bucket.
pub fn monthly_summaries(commits: &[Commit]) -> Vec<MonthlySummary> {
    let mut buckets: BTreeMap<(i32, u32), MonthlySummary> = BTreeMap::new();

    for commit in commits {
        let ts = commit.raw.timestamp;
        let (year, month) = (ts.year(), ts.month());
        let summary = buckets.entry((year, month)).or_insert_with(|| MonthlySummary {
            year,
            month,
            month_key: month_key(year, month),
            total_commits: 0,
            unique_authors: Vec::new(),
            author_count: 0,
            insertions: 0,
            deletions: 0,
            net_changes: 0,
            business_impacts: Vec::new(),
            features_added: Vec::new(),
            bugs_fixed: Vec::new(),
            performance_improvements: Vec::new(),
        });

        summary.total_commits += 1;
        summary.insertions += commit.raw.insertions;
        summary.deletions += commit.raw.deletions;
        summary.net_changes += commit.raw.insertions as i64 - commit.raw.deletions as i64;

        let email = commit.raw.author_email.trim().to_lowercase();
        if let Err(pos) = summary.unique_authors.binary_search(&email) {
            summary.unique_authors.insert(pos, email);
        }

        if !summary.business_impacts.contains(&commit.business_impact) {
            summary.business_impacts.push(commit.business_impact);
        }

        let headline = commit.raw.title(100);
        match commit.business_impact {
            BusinessImpact::Feature => {
                if summary.features_added.len() < MAX_FEATURES_PER_MONTH {
                    summary.features_added.push(headline);
                }
            }
            BusinessImpact::BugFix => {
                if summary.bugs_fixed.len() < MAX_BUGS_PER_MONTH {
                    summary.bugs_fixed.push(headline);
                }
            }
            BusinessImpact::Performance => {
                if summary.performance_improvements.len() < MAX_PERF_PER_MONTH {
                    summary.performance_improvements.push(headline);
                }
            }
            BusinessImpact::Security | BusinessImpact::Other => {}
        }
    }

    buckets
        .into_values()
        .map(|mut s| {
            s.author_count = s.unique_authors.len() as u64;
            s.business_impacts.sort();
            s
        })
        .collect()
}

/// Twelve-month activity heatmap ending at the month of the newest commit.
/// Levels are relative to the busiest month in the window; months with no
/// commits are always `Low`.
pub fn activity_heatmap(commits: &[Commit]) -> Vec<HeatmapMonth> {
    let Some(latest) = commits.iter().map(|c| c.raw.timestamp).max() else {
        return Vec::new();
    };

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let (mut year, mut month) = (latest.year(), latest.month());
    // Walk back eleven months from the newest commit's month.
    let mut window: Vec<(i32, u32)> = Vec::with_capacity(12);
    for _ in 0..12 {
        window.push((year, month));
        if month == 1 {
            year -= 1;
            month = 12;
        } else {
            month -= 1;
        }
    }
    window.reverse();
    for (y, m) in &window {
        counts.insert(month_key(*y, *m), 0);
    }

    for commit in commits {
        let key = month_key(commit.raw.timestamp.year(), commit.raw.timestamp.month());
        if let Some(count) = counts.get_mut(&key) {
            *count += 1;
        }
    }

    let max = counts.values().copied().max().unwrap_or(0) as f64;
    window
        .iter()
        .map(|(y, m)| {
            let key = month_key(*y, *m);
            let commit_count = counts.get(&key).copied().unwrap_or(0);
            let activity_level = if commit_count == 0 || max == 0.0 {
                ActivityLevel::Low
            } else {
                let ratio = commit_count as f64 / max;
                if ratio >= 0.75 {
                    ActivityLevel::High
                } else if ratio >= 0.35 {
                    ActivityLevel::Medium
                } else {
                    ActivityLevel::Low
                }
            };
            HeatmapMonth {
                month_key: key,
                commit_count,
                activity_level,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{complexity_score, FileChange, RawCommit};
    use chrono::{DateTime, Utc};

    fn commit_at(ts: &str, email: &str, impact: BusinessImpact, message: &str) -> Commit {
        let timestamp = DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc);
        let raw = RawCommit {
            sha: format!("{}-{}", email, ts),
            message: message.into(),
            author_name: "Dev".into(),
            author_email: email.into(),
            timestamp,
            parents: vec![],
            changes: vec![FileChange {
                path: "src/lib.rs".into(),
                insertions: 8,
                deletions: 3,
            }],
            insertions: 8,
            deletions: 3,
        };
        Commit {
            feature_summary: raw.title(100),
            business_impact: impact,
            complexity_score: complexity_score(8, 3, 1),
            raw,
        }
    }

    #[test]
    fn buckets_by_calendar_month() {
        let commits = vec![
            commit_at("2024-01-10T00:00:00Z", "a@x.com", BusinessImpact::Feature, "Add export"),
            commit_at("2024-01-20T00:00:00Z", "b@x.com", BusinessImpact::BugFix, "Fix export"),
            commit_at("2024-03-05T00:00:00Z", "a@x.com", BusinessImpact::Other, "Tidy"),
        ];
        let months = monthly_summaries(&commits);
        assert_eq!(months.len(), 2);

        let jan = &months[0];
        assert_eq!(jan.month_key, "2024-01");
        assert_eq!(jan.total_commits, 2);
        assert_eq!(jan.author_count, 2);
        assert_eq!(jan.net_changes, 10);
        assert_eq!(jan.features_added, vec!["Add export".to_string()]);
        assert_eq!(jan.bugs_fixed, vec!["Fix export".to_string()]);
        assert_eq!(
            jan.business_impacts,
            vec![BusinessImpact::Feature, BusinessImpact::BugFix]
        );

        assert_eq!(months[1].month_key, "2024-03");
    }

    #[test]
    fn highlight_lists_are_capped() {
        let commits: Vec<Commit> = (0..8)
            .map(|i| {
                commit_at(
                    "2024-02-01T00:00:00Z",
                    "a@x.com",
                    BusinessImpact::Feature,
                    &format!("Add widget {}", i),
                )
            })
            .collect();
        let months = monthly_summaries(&commits);
        assert_eq!(months[0].total_commits, 8);
        assert_eq!(months[0].features_added.len(), 5);
    }

    #[test]
    fn heatmap_covers_trailing_year() {
        let commits = vec![
            commit_at("2024-06-01T00:00:00Z", "a@x.com", BusinessImpact::Other, "x"),
            commit_at("2024-06-02T00:00:00Z", "a@x.com", BusinessImpact::Other, "x"),
            commit_at("2024-06-03T00:00:00Z", "a@x.com", BusinessImpact::Other, "x"),
            commit_at("2024-06-04T00:00:00Z", "a@x.com", BusinessImpact::Other, "x"),
            commit_at("2024-05-01T00:00:00Z", "a@x.com", BusinessImpact::Other, "x"),
            commit_at("2024-05-02T00:00:00Z", "a@x.com", BusinessImpact::Other, "x"),
            commit_at("2024-04-01T00:00:00Z", "a@x.com", BusinessImpact::Other, "x"),
            // Outside the window.
            commit_at("2022-01-01T00:00:00Z", "a@x.com", BusinessImpact::Other, "x"),
        ];
        let heatmap = activity_heatmap(&commits);
        assert_eq!(heatmap.len(), 12);
        assert_eq!(heatmap[0].month_key, "2023-07");
        assert_eq!(heatmap[11].month_key, "2024-06");

        let by_key = |k: &str| heatmap.iter().find(|m| m.month_key == k).unwrap();
        assert_eq!(by_key("2024-06").activity_level, ActivityLevel::High);
        assert_eq!(by_key("2024-05").activity_level, ActivityLevel::Medium);
        assert_eq!(by_key("2024-04").activity_level, ActivityLevel::Low);
        assert_eq!(by_key("2023-12").commit_count, 0);
        assert_eq!(by_key("2023-12").activity_level, ActivityLevel::Low);
    }

    #[test]
    fn empty_history_yields_empty_heatmap() {
        assert!(activity_heatmap(&[]).is_empty());
        assert!(monthly_summaries(&[]).is_empty());
    }
}
