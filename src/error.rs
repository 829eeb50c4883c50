//! Pipeline error taxonomy.
//!
//! Every failure mode in the analysis pipeline maps to a [`PipelineError`]
//! variant with a stable, machine-checkable kind string. The contract:
//!
//! - `repository_access`: fatal, fails the job, surfaced verbatim.
//! - `classification_timeout` / `classification_empty`: recovered locally
//!   via the heuristic fallback, never surfaced to callers.
//! - `graph_write`: retried with backoff, fatal once retries are exhausted.
//! - `completion`: recovered during chat by answering with the assembled
//!   context, so the caller never sees a failure.
//! - `cancelled`: the job was cancelled between phases.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The repository could not be cloned, fetched, or walked.
    #[error("repository access failed: {0}")]
    RepositoryAccess(String),

    /// A classification call exceeded its deadline.
    #[error("classification timed out after {timeout_secs}s for commit {sha}")]
    ClassificationTimeout { sha: String, timeout_secs: u64 },

    /// The completion provider returned empty content for a classification.
    #[error("classification returned empty content for commit {sha}")]
    ClassificationEmpty { sha: String },

    /// A graph store write failed after retry exhaustion.
    #[error("graph write failed: {0}")]
    GraphWrite(String),

    /// A text-completion call failed outside the classification path.
    #[error("completion failed: {0}")]
    Completion(String),

    /// The job was cancelled before this phase started.
    #[error("job cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Stable kind identifier stored in the job's `error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::RepositoryAccess(_) => "repository_access",
            PipelineError::ClassificationTimeout { .. } => "classification_timeout",
            PipelineError::ClassificationEmpty { .. } => "classification_empty",
            PipelineError::GraphWrite(_) => "graph_write",
            PipelineError::Completion(_) => "completion",
            PipelineError::Cancelled => "cancelled",
        }
    }

    /// Whether this error must fail the whole job (as opposed to being
    /// recovered per-item via a fallback).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::RepositoryAccess(_)
                | PipelineError::GraphWrite(_)
                | PipelineError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            PipelineError::RepositoryAccess("x".into()).kind(),
            "repository_access"
        );
        assert_eq!(PipelineError::GraphWrite("x".into()).kind(), "graph_write");
        assert_eq!(PipelineError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn classification_errors_are_recoverable() {
        let timeout = PipelineError::ClassificationTimeout {
            sha: "abc".into(),
            timeout_secs: 10,
        };
        assert!(!timeout.is_fatal());
        assert!(!PipelineError::ClassificationEmpty { sha: "abc".into() }.is_fatal());
        assert!(!PipelineError::Completion("x".into()).is_fatal());
    }
}
