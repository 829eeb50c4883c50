//! End-to-end pipeline tests against a real git repository fixture.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use repolens::analyzer::Analyzer;
use repolens::completion::DisabledCompletion;
use repolens::config::{Config, StorageConfig};
use repolens::expertise::ScoreField;
use repolens::git::GitCliReader;
use repolens::graph::{GraphStore, SqliteGraph};
use repolens::job::JobPhase;
use repolens::models::MilestoneType;

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .status()
        .expect("git not available");
    assert!(status.success(), "git {:?} failed", args);
}

fn commit(dir: &Path, file: &str, content: &str, message: &str, author: (&str, &str), date: &str) {
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    git(dir, &["add", "."]);
    let status = Command::new("git")
        .args(["commit", "-m", message])
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", author.0)
        .env("GIT_AUTHOR_EMAIL", author.1)
        .env("GIT_COMMITTER_NAME", author.0)
        .env("GIT_COMMITTER_EMAIL", author.1)
        .env("GIT_AUTHOR_DATE", date)
        .env("GIT_COMMITTER_DATE", date)
        .status()
        .expect("git not available");
    assert!(status.success(), "commit '{}' failed", message);
}

/// A small repository with two authors, four commits, and one tag.
fn build_fixture(root: &Path) -> PathBuf {
    let repo = root.join("fixture");
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-b", "main"]);

    commit(
        &repo,
        "src/lib.rs",
        "pub fn core() {}\n",
        "Add core module",
        ("Ada", "ada@example.com"),
        "2024-04-01T10:00:00+00:00",
    );
    commit(
        &repo,
        "src/parser.rs",
        "pub fn parse() {}\n",
        "Fix panic in parser",
        ("Bob", "bob@example.com"),
        "2024-04-15T10:00:00+00:00",
    );
    commit(
        &repo,
        "src/lib.rs",
        "pub fn core() { /* faster */ }\n",
        "Optimize lookup speed",
        ("Ada", "ada@example.com"),
        "2024-05-02T10:00:00+00:00",
    );
    commit(
        &repo,
        "README.md",
        "# fixture\n",
        "Release v1.0.0",
        ("Ada", "ada@example.com"),
        "2024-05-20T10:00:00+00:00",
    );
    git(&repo, &["tag", "v1.0.0"]);
    repo
}

fn test_config(db_path: PathBuf) -> Config {
    Config {
        storage: StorageConfig { path: db_path },
        ..Config::default_local()
    }
}

async fn analyzer_for(dir: &Path) -> Analyzer {
    let config = test_config(dir.join("graph.sqlite"));
    let store: Arc<dyn GraphStore> = Arc::new(
        SqliteGraph::connect(&config.storage.path).await.unwrap(),
    );
    let reader = Arc::new(GitCliReader::new(&config.git, &config.storage.path));
    Analyzer::new(config, reader, Arc::new(DisabledCompletion), store)
}

#[tokio::test]
async fn full_pipeline_builds_queryable_graph() {
    let dir = tempfile::tempdir().unwrap();
    let repo = build_fixture(dir.path());
    let analyzer = analyzer_for(dir.path()).await;

    let outcome = analyzer
        .analyze(repo.to_str().unwrap(), None)
        .await
        .unwrap();

    assert_eq!(outcome.codebase.id, repo.to_str().unwrap());
    assert_eq!(outcome.codebase.name, "fixture");
    assert_eq!(outcome.codebase.default_branch, "main");
    assert_eq!(outcome.codebase.total_commits, 4);
    assert_eq!(outcome.codebase.total_developers, 2);

    let job = analyzer.get_job_status(outcome.job_id).unwrap();
    assert_eq!(job.phase, JobPhase::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.error_kind.is_none());

    let stats = analyzer.get_graph_stats(repo.to_str().unwrap()).await.unwrap();
    assert_eq!(stats.node_counts["codebase"], 1);
    assert_eq!(stats.node_counts["commit"], 4);
    assert_eq!(stats.node_counts["developer"], 2);
    assert_eq!(stats.node_counts["file"], 3);
    assert_eq!(stats.edge_counts["contains_commit"], 4);
    assert_eq!(stats.edge_counts["authored"], 4);
    // A linear four-commit history has three ancestry edges.
    assert_eq!(stats.edge_counts["parent_of"], 3);
    assert!(stats.node_counts["branch"] >= 1);

    let export = analyzer
        .get_graph_snapshot(repo.to_str().unwrap())
        .await
        .unwrap();
    assert_eq!(export.nodes.len() as u64, export.stats.total_nodes);
    assert_eq!(export.relationships.len() as u64, export.stats.total_edges);
}

#[tokio::test]
async fn scorecards_rank_by_contribution() {
    let dir = tempfile::tempdir().unwrap();
    let repo = build_fixture(dir.path());
    let analyzer = analyzer_for(dir.path()).await;
    analyzer.analyze(repo.to_str().unwrap(), None).await.unwrap();

    let developers = analyzer
        .get_developer_scorecards(repo.to_str().unwrap(), ScoreField::Contribution)
        .await
        .unwrap();
    assert_eq!(developers.len(), 2);
    assert_eq!(developers[0].email, "ada@example.com");
    assert_eq!(developers[0].total_commits, 3);
    assert!(developers[0].contribution_score >= developers[1].contribution_score);
    assert!(developers
        .iter()
        .all(|d| d.contribution_score >= 0.0 && d.contribution_score <= 100.0));
    assert!(!developers[0].grade.is_empty());
    assert!(developers[0].expertise_areas.contains(&"Backend".to_string()));
}

#[tokio::test]
async fn timeline_has_months_and_deduped_milestone() {
    let dir = tempfile::tempdir().unwrap();
    let repo = build_fixture(dir.path());
    let analyzer = analyzer_for(dir.path()).await;
    analyzer.analyze(repo.to_str().unwrap(), None).await.unwrap();

    let timeline = analyzer
        .get_business_timeline(repo.to_str().unwrap())
        .await
        .unwrap();
    assert_eq!(timeline.monthly_summaries.len(), 2);
    let april = &timeline.monthly_summaries[0];
    assert_eq!(april.month_key, "2024-04");
    assert_eq!(april.total_commits, 2);
    assert_eq!(april.author_count, 2);
    assert_eq!(april.features_added, vec!["Add core module".to_string()]);
    assert_eq!(april.bugs_fixed, vec!["Fix panic in parser".to_string()]);

    // The tag and the "Release v1.0.0" commit land on the same day and
    // version, so they collapse into one milestone.
    assert_eq!(timeline.milestones.len(), 1);
    let release = &timeline.milestones[0];
    assert_eq!(release.milestone_type, MilestoneType::Release);
    assert_eq!(release.version.as_deref(), Some("1.0.0"));

    assert_eq!(timeline.heatmap.len(), 12);
    assert_eq!(timeline.heatmap[11].month_key, "2024-05");
    assert!(timeline.heatmap.iter().any(|m| m.commit_count > 0));
}

#[tokio::test]
async fn reanalysis_converges() {
    let dir = tempfile::tempdir().unwrap();
    let repo = build_fixture(dir.path());
    let analyzer = analyzer_for(dir.path()).await;

    let first = analyzer.analyze(repo.to_str().unwrap(), None).await.unwrap();
    let second = analyzer.analyze(repo.to_str().unwrap(), None).await.unwrap();
    assert_eq!(first.snapshot.total_nodes, second.snapshot.total_nodes);
    assert_eq!(first.snapshot.total_edges, second.snapshot.total_edges);
    assert_eq!(
        analyzer.list_codebases().await.unwrap(),
        vec![repo.to_str().unwrap().to_string()]
    );
}

#[tokio::test]
async fn repositories_sharing_a_name_keep_separate_graphs() {
    let dir = tempfile::tempdir().unwrap();
    // Two distinct repositories whose URLs end in the same segment.
    let repo_a = build_fixture(&dir.path().join("org-a"));
    let repo_b = build_fixture(&dir.path().join("org-b"));
    let analyzer = analyzer_for(dir.path()).await;

    let first = analyzer.analyze(repo_a.to_str().unwrap(), None).await.unwrap();
    let second = analyzer.analyze(repo_b.to_str().unwrap(), None).await.unwrap();
    assert_eq!(first.codebase.name, second.codebase.name);
    assert_ne!(first.codebase.id, second.codebase.id);

    let mut listed = analyzer.list_codebases().await.unwrap();
    listed.sort();
    assert_eq!(
        listed,
        vec![
            repo_a.to_str().unwrap().to_string(),
            repo_b.to_str().unwrap().to_string(),
        ]
    );

    // Analyzing the second repository must not clobber the first.
    let stats_a = analyzer.get_graph_stats(repo_a.to_str().unwrap()).await.unwrap();
    assert_eq!(stats_a.node_counts["commit"], 4);
    let stats_b = analyzer.get_graph_stats(repo_b.to_str().unwrap()).await.unwrap();
    assert_eq!(stats_b.node_counts["commit"], 4);
}

#[tokio::test]
async fn commit_cap_truncates_silently() {
    let dir = tempfile::tempdir().unwrap();
    let repo = build_fixture(dir.path());
    let analyzer = analyzer_for(dir.path()).await;

    let outcome = analyzer
        .analyze(repo.to_str().unwrap(), Some(2))
        .await
        .unwrap();
    assert_eq!(outcome.codebase.total_commits, 2);
    assert_eq!(
        analyzer.get_job_status(outcome.job_id).unwrap().phase,
        JobPhase::Completed
    );
}

#[tokio::test]
async fn chat_answers_from_graph_context() {
    let dir = tempfile::tempdir().unwrap();
    let repo = build_fixture(dir.path());
    let analyzer = analyzer_for(dir.path()).await;
    analyzer.analyze(repo.to_str().unwrap(), None).await.unwrap();

    // Provider disabled: the grounded context comes back verbatim.
    let answer = analyzer
        .answer_question(repo.to_str().unwrap(), "who fixed the parser panic?", &[])
        .await
        .unwrap();
    assert!(answer.contains("Fix panic in parser"));

    let overview = analyzer
        .answer_question(repo.to_str().unwrap(), "xylophone?", &[])
        .await
        .unwrap();
    assert!(overview.contains("=== REPOSITORY OVERVIEW ==="));
}

#[tokio::test]
async fn unreachable_repository_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let analyzer = analyzer_for(dir.path()).await;

    let missing = dir.path().join("does-not-exist");
    let err = analyzer
        .analyze(missing.to_str().unwrap(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "repository_access");
}
