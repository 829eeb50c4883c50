//! Analysis job lifecycle tracking.
//!
//! Each analysis run is a job advancing through a fixed phase order:
//!
//! ```text
//! queued -> cloning -> extracting -> classifying
//!        -> aggregating -> building_graph -> completed
//! ```
//!
//! `failed` and `cancelled` are reachable from any non-terminal phase;
//! terminal phases never change again. Progress is a monotonic percentage
//! attached to each phase; a failed job keeps the progress it had.
//! Terminal jobs stay queryable for a retention window and are then
//! purged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Cloning,
    Extracting,
    Classifying,
    Aggregating,
    BuildingGraph,
    Completed,
    Failed,
    Cancelled,
}

impl JobPhase {
    /// Running phases in order; terminal failure states are not part of
    /// the ladder.
    const LADDER: [JobPhase; 7] = [
        JobPhase::Queued,
        JobPhase::Cloning,
        JobPhase::Extracting,
        JobPhase::Classifying,
        JobPhase::Aggregating,
        JobPhase::BuildingGraph,
        JobPhase::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::Cloning => "cloning",
            JobPhase::Extracting => "extracting",
            JobPhase::Classifying => "classifying",
            JobPhase::Aggregating => "aggregating",
            JobPhase::BuildingGraph => "building_graph",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
            JobPhase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Failed | JobPhase::Cancelled
        )
    }

    /// Human-readable status line for pollers.
    pub fn message(&self) -> &'static str {
        match self {
            JobPhase::Queued => "Waiting to start",
            JobPhase::Cloning => "Cloning repository",
            JobPhase::Extracting => "Extracting commit history",
            JobPhase::Classifying => "Classifying commits",
            JobPhase::Aggregating => "Aggregating statistics",
            JobPhase::BuildingGraph => "Building knowledge graph",
            JobPhase::Completed => "Analysis complete",
            JobPhase::Failed => "Analysis failed",
            JobPhase::Cancelled => "Analysis cancelled",
        }
    }

    /// Progress percentage at entry to this phase.
    pub fn progress(&self) -> Option<u8> {
        match self {
            JobPhase::Queued => Some(0),
            JobPhase::Cloning => Some(5),
            JobPhase::Extracting => Some(15),
            JobPhase::Classifying => Some(30),
            JobPhase::Aggregating => Some(70),
            JobPhase::BuildingGraph => Some(85),
            JobPhase::Completed => Some(100),
            JobPhase::Failed | JobPhase::Cancelled => None,
        }
    }

    fn ladder_index(&self) -> Option<usize> {
        Self::LADDER.iter().position(|p| p == self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub codebase_url: String,
    pub phase: JobPhase,
    pub progress: u8,
    pub message: String,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// In-process job registry. Transitions are atomic under one lock; a
/// status read observes either the old phase or the new one, never a
/// mix of phase and progress.
pub struct JobTracker {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
    retention: Duration,
}

impl JobTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    fn locked_err() -> PipelineError {
        PipelineError::GraphWrite("job registry lock poisoned".to_string())
    }

    pub fn create(&self, codebase_url: &str) -> Result<Uuid, PipelineError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = JobRecord {
            id,
            codebase_url: codebase_url.to_string(),
            phase: JobPhase::Queued,
            progress: 0,
            message: JobPhase::Queued.message().to_string(),
            error_kind: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        let mut jobs = self.jobs.write().map_err(|_| Self::locked_err())?;
        jobs.insert(id, record);
        info!(job = %id, url = codebase_url, "job created");
        Ok(id)
    }

    /// Advance to the next phase on the ladder. Skipping phases, moving
    /// backwards, or touching a terminal job is rejected.
    pub fn advance(&self, id: Uuid, phase: JobPhase) -> Result<(), PipelineError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::locked_err())?;
        let record = jobs
            .get_mut(&id)
            .ok_or_else(|| PipelineError::GraphWrite(format!("unknown job {}", id)))?;

        if record.phase == JobPhase::Cancelled {
            return Err(PipelineError::Cancelled);
        }
        let (Some(from), Some(to)) = (record.phase.ladder_index(), phase.ladder_index()) else {
            return Err(PipelineError::GraphWrite(format!(
                "illegal transition {} -> {}",
                record.phase.as_str(),
                phase.as_str()
            )));
        };
        if to != from + 1 {
            return Err(PipelineError::GraphWrite(format!(
                "illegal transition {} -> {}",
                record.phase.as_str(),
                phase.as_str()
            )));
        }

        record.phase = phase;
        record.message = phase.message().to_string();
        if let Some(progress) = phase.progress() {
            record.progress = progress;
        }
        record.updated_at = Utc::now();
        if phase.is_terminal() {
            record.finished_at = Some(record.updated_at);
        }
        Ok(())
    }

    /// Mark the job failed with the error's stable kind. No-op on jobs
    /// that already reached a terminal phase.
    pub fn fail(&self, id: Uuid, error: &PipelineError) {
        let Ok(mut jobs) = self.jobs.write() else {
            return;
        };
        let Some(record) = jobs.get_mut(&id) else {
            return;
        };
        if record.phase.is_terminal() {
            return;
        }
        warn!(job = %id, kind = error.kind(), "job failed");
        record.phase = JobPhase::Failed;
        record.message = error.to_string();
        record.error_kind = Some(error.kind().to_string());
        record.error_message = Some(error.to_string());
        record.updated_at = Utc::now();
        record.finished_at = Some(record.updated_at);
    }

    /// Request cancellation. Returns false when the job is unknown or
    /// already terminal.
    pub fn cancel(&self, id: Uuid) -> bool {
        let Ok(mut jobs) = self.jobs.write() else {
            return false;
        };
        let Some(record) = jobs.get_mut(&id) else {
            return false;
        };
        if record.phase.is_terminal() {
            return false;
        }
        record.phase = JobPhase::Cancelled;
        record.message = JobPhase::Cancelled.message().to_string();
        record.updated_at = Utc::now();
        record.finished_at = Some(record.updated_at);
        info!(job = %id, "job cancelled");
        true
    }

    /// Cooperative cancellation check between phases.
    pub fn check_cancelled(&self, id: Uuid) -> Result<(), PipelineError> {
        let jobs = self.jobs.read().map_err(|_| Self::locked_err())?;
        match jobs.get(&id) {
            Some(record) if record.phase == JobPhase::Cancelled => Err(PipelineError::Cancelled),
            _ => Ok(()),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<JobRecord> {
        self.jobs.read().ok()?.get(&id).cloned()
    }

    pub fn list(&self) -> Vec<JobRecord> {
        let Ok(jobs) = self.jobs.read() else {
            return Vec::new();
        };
        let mut records: Vec<JobRecord> = jobs.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Drop terminal jobs whose retention window has elapsed as of `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(mut jobs) = self.jobs.write() else {
            return 0;
        };
        let retention =
            chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::hours(1));
        let before = jobs.len();
        jobs.retain(|_, record| match record.finished_at {
            Some(finished) => now - finished < retention,
            None => true,
        });
        before - jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> JobTracker {
        JobTracker::new(Duration::from_secs(3600))
    }

    #[test]
    fn happy_path_progress_is_monotonic() {
        let tracker = tracker();
        let id = tracker.create("https://example.com/r").unwrap();
        let mut last = tracker.get(id).unwrap().progress;
        for phase in [
            JobPhase::Cloning,
            JobPhase::Extracting,
            JobPhase::Classifying,
            JobPhase::Aggregating,
            JobPhase::BuildingGraph,
            JobPhase::Completed,
        ] {
            tracker.advance(id, phase).unwrap();
            let record = tracker.get(id).unwrap();
            assert!(record.progress >= last);
            last = record.progress;
        }
        assert_eq!(last, 100);
        assert!(tracker.get(id).unwrap().finished_at.is_some());
    }

    #[test]
    fn phase_skips_are_rejected() {
        let tracker = tracker();
        let id = tracker.create("u").unwrap();
        assert!(tracker.advance(id, JobPhase::Classifying).is_err());
        tracker.advance(id, JobPhase::Cloning).unwrap();
        assert!(tracker.advance(id, JobPhase::Queued).is_err());
    }

    #[test]
    fn terminal_jobs_are_immutable() {
        let tracker = tracker();
        let id = tracker.create("u").unwrap();
        tracker.advance(id, JobPhase::Cloning).unwrap();
        tracker.fail(id, &PipelineError::RepositoryAccess("gone".into()));

        let record = tracker.get(id).unwrap();
        assert_eq!(record.phase, JobPhase::Failed);
        assert_eq!(record.error_kind.as_deref(), Some("repository_access"));
        assert_eq!(record.progress, 5);

        assert!(!tracker.cancel(id));
        tracker.fail(id, &PipelineError::Cancelled);
        assert_eq!(
            tracker.get(id).unwrap().error_kind.as_deref(),
            Some("repository_access")
        );
    }

    #[test]
    fn cancellation_is_observable_between_phases() {
        let tracker = tracker();
        let id = tracker.create("u").unwrap();
        assert!(tracker.check_cancelled(id).is_ok());
        assert!(tracker.cancel(id));
        assert!(matches!(
            tracker.check_cancelled(id),
            Err(PipelineError::Cancelled)
        ));
        assert!(matches!(
            tracker.advance(id, JobPhase::Cloning),
            Err(PipelineError::Cancelled)
        ));
    }

    #[test]
    fn purge_removes_only_expired_terminal_jobs() {
        let tracker = JobTracker::new(Duration::from_secs(60));
        let done = tracker.create("a").unwrap();
        let running = tracker.create("b").unwrap();
        tracker.cancel(done);

        assert_eq!(tracker.purge_expired(Utc::now()), 0);
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(tracker.purge_expired(later), 1);
        assert!(tracker.get(done).is_none());
        assert!(tracker.get(running).is_some());
    }
}
