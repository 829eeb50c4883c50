//! Developer aggregation, expertise inference, and scorecards.
//!
//! Commits are grouped by lowercased author email. Expertise areas come
//! from a fixed path-pattern table; each touched file votes for at most
//! one area and a developer keeps their top-K areas by vote count.
//!
//! Scores are relative to the analyzed slice of history, each clamped to
//! 0..=100:
//!
//! - productivity: commit share scaled by developer count
//! - impact: insertion share scaled by developer count
//! - consistency: total commits against a 50-commit ceiling
//! - collaboration: 25 points per expertise area
//!
//! The contribution score is the mean of the four, and the letter grade
//! is a fixed banding of that mean.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use tracing::debug;

use crate::config::ExpertiseConfig;
use crate::models::{Commit, Developer};

/// Area label table. Tables are checked in order; the first matching
/// table claims the file.
const AREA_TABLE: &[(&str, &[&str])] = &[
    ("Frontend Styling", &["*.css", "*.scss", "*.sass", "*.less"]),
    (
        "Frontend",
        &["*.js", "*.jsx", "*.ts", "*.tsx", "*.vue", "*.svelte", "*.html"],
    ),
    (
        "Backend",
        &["*.py", "*.rs", "*.go", "*.java", "*.rb", "*.php", "*.cs"],
    ),
    ("Data Layer", &["*.sql", "**/migrations/**"]),
    (
        "DevOps",
        &[
            "Dockerfile*",
            "docker-compose*",
            "**/ci/**/*.yml",
            "**/ci/**/*.yaml",
            "**/.github/**/*.yml",
            "**/.github/**/*.yaml",
            "**/.gitlab/**/*.yml",
            "**/.gitlab/**/*.yaml",
            "*.tf",
        ],
    ),
    ("Testing", &["**/test/**", "**/tests/**", "*_test.*", "*.spec.*"]),
    ("Documentation", &["*.md", "*.rst", "*.txt"]),
];

struct AreaMatcher {
    sets: Vec<(&'static str, GlobSet)>,
}

fn matcher() -> &'static AreaMatcher {
    static MATCHER: OnceLock<AreaMatcher> = OnceLock::new();
    MATCHER.get_or_init(|| {
        let mut sets = Vec::with_capacity(AREA_TABLE.len());
        for (label, patterns) in AREA_TABLE {
            let mut builder = GlobSetBuilder::new();
            for pattern in *patterns {
                // Patterns are static and known-valid; a bad one is a
                // programming error caught by the table test below.
                if let Ok(glob) = Glob::new(pattern) {
                    builder.add(glob);
                }
            }
            if let Ok(set) = builder.build() {
                sets.push((*label, set));
            }
        }
        AreaMatcher { sets }
    })
}

/// Area label for one file path, if any table claims it.
pub fn area_for_path(path: &str) -> Option<&'static str> {
    let m = matcher();
    for (label, set) in &m.sets {
        if set.is_match(path) {
            return Some(label);
        }
    }
    None
}

#[derive(Default)]
struct DeveloperAccumulator {
    name: String,
    aliases: Vec<String>,
    commits: u64,
    lines_added: u64,
    lines_removed: u64,
    area_votes: BTreeMap<&'static str, u64>,
}

/// Aggregate classified commits into scored developer records, sorted by
/// contribution score descending with email as the tiebreaker.
pub fn build_developers(commits: &[Commit], config: &ExpertiseConfig) -> Vec<Developer> {
    let mut accumulators: HashMap<String, DeveloperAccumulator> = HashMap::new();

    for commit in commits {
        let email = commit.raw.author_email.trim().to_lowercase();
        let entry = accumulators.entry(email).or_default();
        if entry.name.is_empty() {
            entry.name = commit.raw.author_name.clone();
        } else if entry.name != commit.raw.author_name
            && !entry.aliases.contains(&commit.raw.author_name)
        {
            entry.aliases.push(commit.raw.author_name.clone());
        }
        entry.commits += 1;
        entry.lines_added += commit.raw.insertions;
        entry.lines_removed += commit.raw.deletions;
        for change in &commit.raw.changes {
            if let Some(area) = area_for_path(&change.path) {
                *entry.area_votes.entry(area).or_insert(0) += 1;
            }
        }
    }

    let dev_count = accumulators.len() as f64;
    let total_commits: u64 = accumulators.values().map(|a| a.commits).sum();
    let total_lines_added: u64 = accumulators.values().map(|a| a.lines_added).sum();

    let mut developers: Vec<Developer> = accumulators
        .into_iter()
        .map(|(email, acc)| {
            let expertise_areas = top_areas(&acc.area_votes, config.top_k);

            let commit_share = if total_commits > 0 {
                acc.commits as f64 / total_commits as f64
            } else {
                0.0
            };
            // Impact weighs insertions only; deletions still show up in
            // the record but do not inflate the score.
            let line_share = if total_lines_added > 0 {
                acc.lines_added as f64 / total_lines_added as f64
            } else {
                0.0
            };

            let productivity_score = (commit_share * dev_count * 100.0).min(100.0);
            let impact_score = (line_share * dev_count * 100.0).min(100.0);
            let consistency_score = (acc.commits as f64 * 100.0 / 50.0).min(100.0);
            let collaboration_score = (expertise_areas.len() as f64 * 25.0).min(100.0);
            let contribution_score =
                (productivity_score + impact_score + consistency_score + collaboration_score)
                    / 4.0;

            Developer {
                email,
                name: acc.name,
                aliases: acc.aliases,
                expertise_areas,
                total_commits: acc.commits,
                lines_added: acc.lines_added,
                lines_removed: acc.lines_removed,
                productivity_score,
                impact_score,
                consistency_score,
                collaboration_score,
                contribution_score,
                grade: grade(contribution_score).to_string(),
            }
        })
        .collect();

    developers.sort_by(|a, b| {
        b.contribution_score
            .partial_cmp(&a.contribution_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.email.cmp(&b.email))
    });

    debug!(developers = developers.len(), "built developer scorecards");
    developers
}

/// Top-K areas by vote count; ties break on label name ascending.
fn top_areas(votes: &BTreeMap<&'static str, u64>, top_k: usize) -> Vec<String> {
    let mut ranked: Vec<(&str, u64)> = votes.iter().map(|(l, c)| (*l, *c)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(top_k)
        .map(|(label, _)| label.to_string())
        .collect()
}

/// Score field scorecards can be ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreField {
    Productivity,
    Impact,
    Consistency,
    Collaboration,
    #[default]
    Contribution,
}

impl ScoreField {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "productivity" => Some(ScoreField::Productivity),
            "impact" => Some(ScoreField::Impact),
            "consistency" => Some(ScoreField::Consistency),
            "collaboration" => Some(ScoreField::Collaboration),
            "contribution" => Some(ScoreField::Contribution),
            _ => None,
        }
    }

    fn value(&self, developer: &Developer) -> f64 {
        match self {
            ScoreField::Productivity => developer.productivity_score,
            ScoreField::Impact => developer.impact_score,
            ScoreField::Consistency => developer.consistency_score,
            ScoreField::Collaboration => developer.collaboration_score,
            ScoreField::Contribution => developer.contribution_score,
        }
    }
}

/// Re-rank scorecards by one score field, descending. The sort is
/// stable, so ties keep their existing relative order.
pub fn rank_developers(developers: &mut [Developer], field: ScoreField) {
    developers.sort_by(|a, b| {
        field
            .value(b)
            .partial_cmp(&field.value(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Letter grade for a contribution score.
pub fn grade(score: f64) -> &'static str {
    if score >= 90.0 {
        "A+"
    } else if score >= 80.0 {
        "A"
    } else if score >= 70.0 {
        "B+"
    } else if score >= 60.0 {
        "B"
    } else if score >= 50.0 {
        "C+"
    } else if score >= 40.0 {
        "C"
    } else {
        "D"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{complexity_score, BusinessImpact, FileChange, RawCommit};
    use chrono::Utc;

    fn commit(email: &str, name: &str, paths: &[&str], ins: u64, del: u64) -> Commit {
        let changes: Vec<FileChange> = paths
            .iter()
            .map(|p| FileChange {
                path: p.to_string(),
                insertions: ins / paths.len().max(1) as u64,
                deletions: del / paths.len().max(1) as u64,
            })
            .collect();
        let raw = RawCommit {
            sha: format!("{}-{}", email, paths.len()),
            message: "work".into(),
            author_name: name.into(),
            author_email: email.into(),
            timestamp: Utc::now(),
            parents: vec![],
            changes,
            insertions: ins,
            deletions: del,
        };
        Commit {
            feature_summary: raw.title(100),
            business_impact: BusinessImpact::Other,
            complexity_score: complexity_score(ins, del, paths.len()),
            raw,
        }
    }

    #[test]
    fn area_table_precedence() {
        assert_eq!(area_for_path("web/app.css"), Some("Frontend Styling"));
        assert_eq!(area_for_path("web/app.ts"), Some("Frontend"));
        assert_eq!(area_for_path("src/main.rs"), Some("Backend"));
        assert_eq!(area_for_path("db/migrations/001_init.sql"), Some("Data Layer"));
        assert_eq!(area_for_path("Dockerfile"), Some("DevOps"));
        assert_eq!(area_for_path("ci/deploy.yml"), Some("DevOps"));
        assert_eq!(area_for_path(".github/workflows/build.yaml"), Some("DevOps"));
        assert_eq!(area_for_path(".gitlab/pipelines/release.yml"), Some("DevOps"));
        assert_eq!(area_for_path("README.md"), Some("Documentation"));
        assert_eq!(area_for_path("LICENSE"), None);
    }

    #[test]
    fn identity_merges_case_insensitively_and_collects_aliases() {
        let commits = vec![
            commit("Ada@Example.com", "Ada", &["src/lib.rs"], 10, 2),
            commit("ada@example.com", "Ada L.", &["src/main.rs"], 5, 1),
        ];
        let devs = build_developers(&commits, &ExpertiseConfig::default());
        assert_eq!(devs.len(), 1);
        assert_eq!(devs[0].email, "ada@example.com");
        assert_eq!(devs[0].name, "Ada");
        assert_eq!(devs[0].aliases, vec!["Ada L.".to_string()]);
        assert_eq!(devs[0].total_commits, 2);
    }

    #[test]
    fn sole_developer_scores_and_grade() {
        // One developer owning everything: productivity and impact share
        // both resolve to 100.
        let commits: Vec<Commit> = (0..50)
            .map(|_| commit("ada@example.com", "Ada", &["src/lib.rs", "web/app.ts"], 20, 10))
            .collect();
        let devs = build_developers(&commits, &ExpertiseConfig::default());
        assert_eq!(devs.len(), 1);
        let d = &devs[0];
        assert_eq!(d.productivity_score, 100.0);
        assert_eq!(d.impact_score, 100.0);
        assert_eq!(d.consistency_score, 100.0);
        assert_eq!(d.collaboration_score, 50.0);
        assert_eq!(d.contribution_score, 87.5);
        assert_eq!(d.grade, "A");
    }

    #[test]
    fn impact_ignores_deletions() {
        // A developer who only removes code earns no impact share, even
        // when their churn dwarfs everyone else's insertions.
        let commits = vec![
            commit("ada@example.com", "Ada", &["src/a.rs"], 100, 0),
            commit("bob@example.com", "Bob", &["src/b.rs"], 0, 5000),
        ];
        let devs = build_developers(&commits, &ExpertiseConfig::default());
        let ada = devs.iter().find(|d| d.email == "ada@example.com").unwrap();
        let bob = devs.iter().find(|d| d.email == "bob@example.com").unwrap();
        assert_eq!(ada.impact_score, 100.0);
        assert_eq!(bob.impact_score, 0.0);
        assert_eq!(bob.lines_removed, 5000);
    }

    #[test]
    fn ranking_is_deterministic() {
        let commits = vec![
            commit("zoe@example.com", "Zoe", &["src/a.rs"], 10, 0),
            commit("amy@example.com", "Amy", &["src/b.rs"], 10, 0),
        ];
        let devs = build_developers(&commits, &ExpertiseConfig::default());
        // Equal scores; email ascending breaks the tie.
        assert_eq!(devs[0].email, "amy@example.com");
        assert_eq!(devs[1].email, "zoe@example.com");
    }

    #[test]
    fn rank_by_selected_field() {
        let commits = vec![
            commit("ada@example.com", "Ada", &["src/a.rs"], 5, 0),
            commit("ada@example.com", "Ada", &["src/a.rs"], 5, 0),
            commit("zoe@example.com", "Zoe", &["src/b.rs"], 200, 0),
        ];
        let mut devs = build_developers(&commits, &ExpertiseConfig::default());

        rank_developers(&mut devs, ScoreField::Productivity);
        assert_eq!(devs[0].email, "ada@example.com");

        rank_developers(&mut devs, ScoreField::Impact);
        assert_eq!(devs[0].email, "zoe@example.com");

        assert_eq!(ScoreField::parse("impact"), Some(ScoreField::Impact));
        assert_eq!(ScoreField::parse("nope"), None);
    }

    #[test]
    fn top_k_bounds_expertise() {
        let commits = vec![commit(
            "ada@example.com",
            "Ada",
            &["a.css", "b.ts", "c.rs", "d.sql", "Dockerfile", "e.md"],
            6,
            0,
        )];
        let config = ExpertiseConfig { top_k: 2 };
        let devs = build_developers(&commits, &config);
        assert_eq!(devs[0].expertise_areas.len(), 2);
        // All areas tie at one vote; label name ascending decides.
        assert_eq!(devs[0].expertise_areas[0], "Backend");
    }
}
