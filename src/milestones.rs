//! Business-milestone detection.
//!
//! Milestones are release-like markers recovered from two sources: tag
//! names and commit messages. A marker is anything carrying a semantic
//! version (`1.2.3` or `v1.2.3`) or a release keyword. Detection is pure
//! over its inputs; identical history always yields identical milestones.
//!
//! Duplicates collapse on `(day, version)` when a version is present,
//! otherwise `(day, name)`; the earlier marker wins and absorbs the
//! other's related commits.

use std::collections::HashMap;
use tracing::debug;

use crate::models::{BusinessMilestone, Commit, MilestoneType, TagRef};

/// Extract the first semantic version in `text`, without any `v` prefix.
/// Accepts `X.Y.Z` with an optional pre-release suffix (`1.2.0-rc.1`).
pub fn extract_version(text: &str) -> Option<String> {
    for token in text.split(|c: char| c.is_whitespace() || c == '(' || c == ')' || c == ',') {
        let token = token.trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != '-');
        let candidate = token
            .strip_prefix('v')
            .or_else(|| token.strip_prefix('V'))
            .unwrap_or(token);
        let core = candidate.split('-').next().unwrap_or(candidate);
        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Keyword classification with fixed precedence. "GA" counts as a release.
fn keyword_type(text: &str) -> Option<MilestoneType> {
    let lower = text.to_lowercase();
    if lower.contains("release") || lower.contains("general availability") {
        return Some(MilestoneType::Release);
    }
    if lower.split(|c: char| !c.is_alphanumeric()).any(|w| w == "ga") {
        return Some(MilestoneType::Release);
    }
    if lower.contains("launch") {
        return Some(MilestoneType::Launch);
    }
    if lower.contains("beta") {
        return Some(MilestoneType::Beta);
    }
    None
}

/// Detect milestones from a classified history slice and the tag
/// snapshot. Output is sorted by date ascending, name ascending.
pub fn detect_milestones(commits: &[Commit], tags: &[TagRef]) -> Vec<BusinessMilestone> {
    let mut found: Vec<BusinessMilestone> = Vec::new();

    for tag in tags {
        let version = extract_version(&tag.name);
        let milestone_type = if version.is_some() {
            MilestoneType::Release
        } else {
            keyword_type(&tag.name).unwrap_or(MilestoneType::Generic)
        };
        found.push(BusinessMilestone {
            name: tag.name.clone(),
            description: format!("Tagged {}", tag.name),
            milestone_type,
            version,
            date: tag.timestamp,
            related_commits: vec![tag.target_sha.clone()],
        });
    }

    for commit in commits {
        let headline = commit.raw.title(100);
        let version = extract_version(&headline);
        let keyword = keyword_type(&headline);
        if version.is_none() && keyword.is_none() {
            continue;
        }
        let milestone_type = match (&version, keyword) {
            (_, Some(k)) => k,
            (Some(_), None) => MilestoneType::Release,
            (None, None) => unreachable!(),
        };
        found.push(BusinessMilestone {
            name: headline.clone(),
            description: headline,
            milestone_type,
            version,
            date: commit.raw.timestamp,
            related_commits: vec![commit.raw.sha.clone()],
        });
    }

    // Earliest marker for a key wins; later ones contribute commits only.
    found.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.name.cmp(&b.name)));
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut deduped: Vec<BusinessMilestone> = Vec::new();
    for milestone in found {
        let key = milestone.dedup_key();
        match by_key.get(&key) {
            Some(&index) => {
                let kept = &mut deduped[index];
                for sha in milestone.related_commits {
                    if !kept.related_commits.contains(&sha) {
                        kept.related_commits.push(sha);
                    }
                }
            }
            None => {
                by_key.insert(key, deduped.len());
                deduped.push(milestone);
            }
        }
    }

    debug!(milestones = deduped.len(), "detected business milestones");
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{complexity_score, BusinessImpact, RawCommit};
    use chrono::{DateTime, Utc};

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    fn commit(sha: &str, ts: &str, message: &str) -> Commit {
        let raw = RawCommit {
            sha: sha.into(),
            message: message.into(),
            author_name: "Dev".into(),
            author_email: "dev@x.com".into(),
            timestamp: at(ts),
            parents: vec![],
            changes: vec![],
            insertions: 1,
            deletions: 0,
        };
        Commit {
            feature_summary: raw.title(100),
            business_impact: BusinessImpact::Other,
            complexity_score: complexity_score(1, 0, 0),
            raw,
        }
    }

    #[test]
    fn version_extraction() {
        assert_eq!(extract_version("Release v1.2.3"), Some("1.2.3".into()));
        assert_eq!(extract_version("bump to 0.4.0"), Some("0.4.0".into()));
        assert_eq!(extract_version("v2.0.0-rc.1 cut"), Some("2.0.0-rc.1".into()));
        assert_eq!(extract_version("version 1.2"), None);
        assert_eq!(extract_version("fix issue 1.2.3.4"), None);
        assert_eq!(extract_version("no markers here"), None);
    }

    #[test]
    fn keyword_precedence() {
        assert_eq!(keyword_type("Release and launch day"), Some(MilestoneType::Release));
        assert_eq!(keyword_type("Launch beta signup"), Some(MilestoneType::Launch));
        assert_eq!(keyword_type("Open beta starts"), Some(MilestoneType::Beta));
        assert_eq!(keyword_type("GA announcement"), Some(MilestoneType::Release));
        assert_eq!(keyword_type("regular work"), None);
    }

    #[test]
    fn tags_and_commits_dedupe_on_same_day_version() {
        let tags = vec![TagRef {
            name: "v1.0.0".into(),
            target_sha: "t1".into(),
            timestamp: at("2024-05-10T08:00:00Z"),
        }];
        let commits = vec![
            commit("c1", "2024-05-10T12:00:00Z", "Release 1.0.0"),
            commit("c2", "2024-05-12T12:00:00Z", "Launch marketing site"),
            commit("c3", "2024-05-13T12:00:00Z", "Ordinary refactor"),
        ];
        let milestones = detect_milestones(&commits, &tags);
        assert_eq!(milestones.len(), 2);

        // Tag came first that day; the commit's sha is absorbed.
        let release = &milestones[0];
        assert_eq!(release.name, "v1.0.0");
        assert_eq!(release.milestone_type, MilestoneType::Release);
        assert_eq!(release.version.as_deref(), Some("1.0.0"));
        assert_eq!(release.related_commits, vec!["t1".to_string(), "c1".to_string()]);

        assert_eq!(milestones[1].milestone_type, MilestoneType::Launch);
    }

    #[test]
    fn detection_is_deterministic() {
        let commits = vec![commit("c1", "2024-01-01T00:00:00Z", "Release v2.0.0")];
        let a = detect_milestones(&commits, &[]);
        let b = detect_milestones(&commits, &[]);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].dedup_key(), b[0].dedup_key());
    }
}
