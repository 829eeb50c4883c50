//! Version-control reader capability.
//!
//! [`VcsReader`] is the seam between the pipeline and the underlying
//! version-control tooling. The production implementation,
//! [`GitCliReader`], shells out to the `git` binary:
//!
//! 1. Clone (or fetch, when already cloned) into a content-addressed
//!    cache directory derived from the repository URL.
//! 2. Resolve the starting reference (remote HEAD, then configured
//!    branch candidates).
//! 3. Parse `git log --numstat` output into [`RawCommit`] records in
//!    reverse-chronological order, truncated silently at the caller's
//!    cap.
//!
//! Merge-commit diff stats are computed against the first parent only
//! (`--diff-merges=first-parent`). Any clone/resolve/walk failure maps to
//! [`PipelineError::RepositoryAccess`], which is fatal to the job.

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use crate::config::GitConfig;
use crate::error::PipelineError;
use crate::models::{Branch, FileChange, RawCommit, TagRef};

/// Record and field separators for `git log` parsing. Control characters
/// cannot appear in commit metadata, unlike newlines in message bodies.
const RECORD_SEP: char = '\u{1}';
const FIELD_SEP: char = '\u{2}';
const BODY_SEP: char = '\u{3}';

/// Strip `.git` suffix and trailing slashes so that equivalent URLs map to
/// the same codebase identity.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
}

/// Short display name from the URL tail (e.g. `.../org/repo` → `repo`).
/// Display only: two repositories can share a tail, so the graph is
/// never scoped by this.
pub fn repo_name(url: &str) -> String {
    let normalized = normalize_url(url);
    normalized
        .rsplit(['/', ':'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("repository")
        .to_string()
}

/// An opened repository bound to a local clone and a resolved start ref.
#[derive(Debug, Clone)]
pub struct RepoHandle {
    pub workdir: PathBuf,
    /// Resolved starting reference, e.g. `origin/main`.
    pub start_ref: String,
    /// Human branch name for the Codebase record, e.g. `main`.
    pub default_branch: String,
}

/// Capability trait for reading version-control history.
pub trait VcsReader: Send + Sync {
    /// Clone or refresh the repository and resolve the starting reference.
    fn open(&self, url: &str, reference: Option<&str>) -> Result<RepoHandle, PipelineError>;

    /// Walk history from the start ref, newest first, up to `limit` commits.
    fn walk_history(
        &self,
        handle: &RepoHandle,
        limit: usize,
    ) -> Result<Vec<RawCommit>, PipelineError>;

    /// Branch snapshot (name + head SHA) at analysis time.
    fn branches(&self, handle: &RepoHandle) -> Result<Vec<Branch>, PipelineError>;

    /// Tag snapshot for milestone detection.
    fn tags(&self, handle: &RepoHandle) -> Result<Vec<TagRef>, PipelineError>;
}

/// `git`-subprocess implementation of [`VcsReader`].
pub struct GitCliReader {
    cache_root: PathBuf,
    branch_candidates: Vec<String>,
}

impl GitCliReader {
    pub fn new(config: &GitConfig, storage_path: &Path) -> Self {
        let cache_root = match &config.cache_dir {
            Some(dir) => dir.clone(),
            None => {
                // Default: sibling of the DB file.
                let parent = storage_path.parent().unwrap_or_else(|| Path::new("."));
                parent.join(".repo-cache")
            }
        };
        Self {
            cache_root,
            branch_candidates: config.branch_candidates.clone(),
        }
    }

    fn clone_dir(&self, url: &str) -> PathBuf {
        self.cache_root.join(short_hash(&normalize_url(url)))
    }

    fn clone_or_update(&self, url: &str, dest: &Path) -> Result<(), PipelineError> {
        if dest.join(".git").exists() {
            debug!(path = %dest.display(), "refreshing existing clone");
            run_git(dest, &["fetch", "--all", "--tags", "--prune", "--quiet"])?;
            return Ok(());
        }

        std::fs::create_dir_all(dest).map_err(|e| {
            PipelineError::RepositoryAccess(format!(
                "failed to create cache directory {}: {}",
                dest.display(),
                e
            ))
        })?;

        debug!(url, path = %dest.display(), "cloning repository");
        let output = Command::new("git")
            .args(["clone", "--quiet", url])
            .arg(dest)
            .output()
            .map_err(|e| {
                PipelineError::RepositoryAccess(format!(
                    "failed to execute 'git clone'. Is git installed? {}",
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::RepositoryAccess(format!(
                "git clone failed for {}: {}",
                url,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn resolve_start_ref(
        &self,
        workdir: &Path,
        reference: Option<&str>,
    ) -> Result<(String, String), PipelineError> {
        if let Some(r) = reference {
            run_git(workdir, &["rev-parse", "--verify", "--quiet", r])?;
            return Ok((r.to_string(), r.to_string()));
        }

        // Remote HEAD first, then configured candidates.
        if let Ok(out) = run_git(workdir, &["rev-parse", "--abbrev-ref", "origin/HEAD"]) {
            let full = out.trim().to_string();
            if let Some(name) = full.strip_prefix("origin/") {
                return Ok((full.clone(), name.to_string()));
            }
        }
        for candidate in &self.branch_candidates {
            let remote_ref = format!("origin/{}", candidate);
            if run_git(workdir, &["rev-parse", "--verify", "--quiet", &remote_ref]).is_ok() {
                return Ok((remote_ref, candidate.clone()));
            }
            if run_git(workdir, &["rev-parse", "--verify", "--quiet", candidate]).is_ok() {
                return Ok((candidate.clone(), candidate.clone()));
            }
        }

        Err(PipelineError::RepositoryAccess(format!(
            "no resolvable start reference (tried origin/HEAD and {:?})",
            self.branch_candidates
        )))
    }
}

impl VcsReader for GitCliReader {
    fn open(&self, url: &str, reference: Option<&str>) -> Result<RepoHandle, PipelineError> {
        let dest = self.clone_dir(url);
        self.clone_or_update(url, &dest)?;
        let (start_ref, default_branch) = self.resolve_start_ref(&dest, reference)?;
        Ok(RepoHandle {
            workdir: dest,
            start_ref,
            default_branch,
        })
    }

    fn walk_history(
        &self,
        handle: &RepoHandle,
        limit: usize,
    ) -> Result<Vec<RawCommit>, PipelineError> {
        let format = format!(
            "{}%H{}%P{}%an{}%ae{}%at{}%B{}",
            RECORD_SEP, FIELD_SEP, FIELD_SEP, FIELD_SEP, FIELD_SEP, FIELD_SEP, BODY_SEP
        );
        let output = run_git(
            &handle.workdir,
            &[
                "log",
                &handle.start_ref,
                "-n",
                &limit.to_string(),
                "--numstat",
                "--no-renames",
                "--diff-merges=first-parent",
                &format!("--pretty=format:{}", format),
            ],
        )?;

        Ok(parse_log_output(&output))
    }

    fn branches(&self, handle: &RepoHandle) -> Result<Vec<Branch>, PipelineError> {
        let output = run_git(
            &handle.workdir,
            &[
                "for-each-ref",
                "refs/remotes/origin",
                "--format=%(refname:short)\t%(objectname)",
            ],
        )?;

        let mut branches = Vec::new();
        for line in output.lines() {
            let mut parts = line.splitn(2, '\t');
            let (Some(name), Some(sha)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Some(short) = name.strip_prefix("origin/") else {
                continue;
            };
            if short == "HEAD" {
                continue;
            }
            branches.push(Branch {
                name: short.to_string(),
                head_sha: sha.trim().to_string(),
            });
        }
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    fn tags(&self, handle: &RepoHandle) -> Result<Vec<TagRef>, PipelineError> {
        let listing = run_git(&handle.workdir, &["tag", "--list"])?;
        let mut tags = Vec::new();
        for name in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            // Dereference annotated tags to the target commit.
            let out = match run_git(&handle.workdir, &["log", "-1", "--format=%H\t%at", name]) {
                Ok(out) => out,
                Err(e) => {
                    warn!(tag = name, error = %e, "skipping unresolvable tag");
                    continue;
                }
            };
            let mut parts = out.trim().splitn(2, '\t');
            let (Some(sha), Some(ts)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(epoch) = ts.trim().parse::<i64>() else {
                continue;
            };
            tags.push(TagRef {
                name: name.to_string(),
                target_sha: sha.to_string(),
                timestamp: timestamp_utc(epoch),
            });
        }
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }
}

fn run_git(workdir: &Path, args: &[&str]) -> Result<String, PipelineError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .map_err(|e| {
            PipelineError::RepositoryAccess(format!("failed to execute git {:?}: {}", args, e))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::RepositoryAccess(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn timestamp_utc(epoch: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap_or_default())
}

/// Parse the sentinel-delimited `git log --numstat` output.
fn parse_log_output(output: &str) -> Vec<RawCommit> {
    let mut commits = Vec::new();

    for record in output.split(RECORD_SEP).skip(1) {
        let Some((header, stat_block)) = record.split_once(BODY_SEP) else {
            continue;
        };
        let fields: Vec<&str> = header.splitn(6, FIELD_SEP).collect();
        if fields.len() != 6 {
            warn!("malformed log record skipped");
            continue;
        }
        let sha = fields[0].trim().to_string();
        let parents: Vec<String> = fields[1]
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();
        let author_name = fields[2].to_string();
        let author_email = fields[3].to_string();
        let Ok(epoch) = fields[4].trim().parse::<i64>() else {
            continue;
        };
        let message = fields[5].trim().to_string();

        let mut changes = Vec::new();
        let mut insertions = 0u64;
        let mut deletions = 0u64;
        for line in stat_block.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.splitn(3, '\t').collect();
            if parts.len() != 3 {
                continue;
            }
            // Binary files report "-" for both counts; they still count as a touch.
            let ins = parts[0].parse::<u64>().unwrap_or(0);
            let del = parts[1].parse::<u64>().unwrap_or(0);
            insertions += ins;
            deletions += del;
            changes.push(FileChange {
                path: parts[2].to_string(),
                insertions: ins,
                deletions: del,
            });
        }

        commits.push(RawCommit {
            sha,
            message,
            author_name,
            author_email,
            timestamp: timestamp_utc(epoch),
            parents,
            changes,
            insertions,
            deletions,
        });
    }

    commits
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}
