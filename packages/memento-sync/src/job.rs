//! Change jobs (§4.9): the per-file unit of work the Sync Coordinator schedules,
//! tracks through its pipeline steps, and retries on transient failure.
//!
//! Typed state enum plus a thin state-machine wrapper enforcing legal transitions,
//! retargeted from one job per snapshot/DAG-stage to one job per `FileChange`,
//! matching the linear per-change pipeline rather than a multi-stage DAG.

use crate::error::{SyncError, SyncErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// `{type, path, timestamp}` as named in §6's external-interface contract;
/// `previous_path` is populated for `Rename`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileChangeType {
    Add,
    Modify,
    Delete,
    Rename,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub change_type: FileChangeType,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub previous_path: Option<PathBuf>,
}

impl FileChange {
    pub fn new(change_type: FileChangeType, path: PathBuf) -> Self {
        Self { change_type, path, timestamp: Utc::now(), previous_path: None }
    }

    pub fn rename(previous_path: PathBuf, path: PathBuf) -> Self {
        Self { change_type: FileChangeType::Rename, path, timestamp: Utc::now(), previous_path: Some(previous_path) }
    }
}

/// Which step of §4.9's 8-step pipeline a running job is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStep {
    Parsing,
    ResolvingRelationships,
    WritingStores,
    UpdatingVectors,
    RetiringStaleEdges,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Parsing => "parsing",
            PipelineStep::ResolvingRelationships => "resolving_relationships",
            PipelineStep::WritingStores => "writing_stores",
            PipelineStep::UpdatingVectors => "updating_vectors",
            PipelineStep::RetiringStaleEdges => "retiring_stale_edges",
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Queued {
        queued_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
        worker_id: String,
        current_step: PipelineStep,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
        entities_written: usize,
        relationships_written: usize,
    },
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
        error_kind: String,
        failed_step: PipelineStep,
        retry_count: u32,
        next_retry_at: Option<DateTime<Utc>>,
    },
    Cancelled {
        cancelled_at: DateTime<Utc>,
        reason: String,
    },
}

impl JobState {
    pub fn state_name(&self) -> &'static str {
        match self {
            JobState::Queued { .. } => "queued",
            JobState::Running { .. } => "running",
            JobState::Completed { .. } => "completed",
            JobState::Failed { .. } => "failed",
            JobState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. } | JobState::Cancelled { .. })
    }
}

/// A `FileChange` under execution: its own id, the change it reacts to, and its
/// pipeline state.
#[derive(Debug, Clone)]
pub struct ChangeJob {
    pub id: Uuid,
    pub change: FileChange,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChangeJob {
    pub fn new_queued(change: FileChange) -> Self {
        let now = Utc::now();
        Self { id: Uuid::new_v4(), change, state: JobState::Queued { queued_at: now }, created_at: now, updated_at: now }
    }
}

/// Exponential backoff per §4.9/§7: base 100ms, cap 30s, max 5 attempts.
pub const RETRY_BASE_MS: u64 = 100;
pub const RETRY_CAP_MS: u64 = 30_000;
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

fn backoff_delay(retry_count: u32) -> chrono::Duration {
    let millis = RETRY_BASE_MS.saturating_mul(1u64 << retry_count.min(20)).min(RETRY_CAP_MS);
    chrono::Duration::milliseconds(millis as i64)
}

/// Enforces the job's legal state transitions.
pub struct JobStateMachine {
    job: ChangeJob,
}

impl JobStateMachine {
    pub fn new(job: ChangeJob) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &ChangeJob {
        &self.job
    }

    pub fn into_job(self) -> ChangeJob {
        self.job
    }

    /// QUEUED → RUNNING
    pub fn start(&mut self, worker_id: String) -> Result<(), SyncError> {
        match &self.job.state {
            JobState::Queued { .. } => {
                let now = Utc::now();
                self.job.state = JobState::Running { started_at: now, worker_id, current_step: PipelineStep::Parsing };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(invalid_transition(&self.job.state, "running")),
        }
    }

    /// RUNNING → RUNNING, advancing the current pipeline step.
    pub fn advance(&mut self, step: PipelineStep) -> Result<(), SyncError> {
        match &mut self.job.state {
            JobState::Running { current_step, .. } => {
                *current_step = step;
                self.job.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(invalid_transition(&self.job.state, "advance")),
        }
    }

    /// RUNNING → COMPLETED
    pub fn complete(&mut self, entities_written: usize, relationships_written: usize) -> Result<(), SyncError> {
        match &self.job.state {
            JobState::Running { started_at, .. } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;
                self.job.state = JobState::Completed {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                    entities_written,
                    relationships_written,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(invalid_transition(&self.job.state, "completed")),
        }
    }

    /// RUNNING|FAILED → FAILED, scheduling a retry when `error` is retryable and
    /// attempts remain.
    pub fn fail(&mut self, error: &SyncError, retry_count: u32) -> Result<(), SyncError> {
        let (started_at, failed_step) = match &self.job.state {
            JobState::Running { started_at, current_step, .. } => (*started_at, *current_step),
            JobState::Failed { started_at, failed_step, .. } => (*started_at, *failed_step),
            _ => return Err(invalid_transition(&self.job.state, "failed")),
        };

        let now = Utc::now();
        let next_retry_at = if error.is_retryable() && retry_count < MAX_RETRY_ATTEMPTS {
            Some(now + backoff_delay(retry_count))
        } else {
            None
        };

        self.job.state = JobState::Failed {
            started_at,
            failed_at: now,
            error: error.message.clone(),
            error_kind: error.kind().as_str().to_string(),
            failed_step,
            retry_count,
            next_retry_at,
        };
        self.job.updated_at = now;
        Ok(())
    }

    /// FAILED → QUEUED, when a retry was scheduled.
    pub fn retry(&mut self) -> Result<(), SyncError> {
        match &self.job.state {
            JobState::Failed { next_retry_at, .. } => {
                if next_retry_at.is_none() {
                    return Err(SyncError::new(SyncErrorKind::InvariantViolation, "no retry scheduled (max attempts exceeded)"));
                }
                let now = Utc::now();
                self.job.state = JobState::Queued { queued_at: now };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(invalid_transition(&self.job.state, "queued (retry)")),
        }
    }

    /// * → CANCELLED, unless already terminal.
    pub fn cancel(&mut self, reason: String) -> Result<(), SyncError> {
        if self.job.state.is_terminal() {
            return Err(invalid_transition(&self.job.state, "cancelled"));
        }
        let now = Utc::now();
        self.job.state = JobState::Cancelled { cancelled_at: now, reason };
        self.job.updated_at = now;
        Ok(())
    }
}

fn invalid_transition(state: &JobState, to: &str) -> SyncError {
    SyncError::new(SyncErrorKind::InvariantViolation, format!("invalid state transition: {} -> {to}", state.state_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> ChangeJob {
        ChangeJob::new_queued(FileChange::new(FileChangeType::Modify, PathBuf::from("src/a.ts")))
    }

    #[test]
    fn test_queued_to_running() {
        let mut sm = JobStateMachine::new(sample_job());
        sm.start("worker-1".to_string()).unwrap();
        assert!(matches!(sm.job().state, JobState::Running { .. }));
    }

    #[test]
    fn test_running_to_completed() {
        let mut sm = JobStateMachine::new(sample_job());
        sm.start("worker-1".to_string()).unwrap();
        sm.complete(3, 2).unwrap();
        match &sm.job().state {
            JobState::Completed { entities_written, relationships_written, .. } => {
                assert_eq!(*entities_written, 3);
                assert_eq!(*relationships_written, 2);
            }
            _ => panic!("expected completed"),
        }
    }

    #[test]
    fn test_transient_failure_schedules_retry_with_base_backoff() {
        let mut sm = JobStateMachine::new(sample_job());
        sm.start("worker-1".to_string()).unwrap();
        let err = SyncError::new(SyncErrorKind::StoreUnavailable, "connection reset");
        sm.fail(&err, 0).unwrap();
        match &sm.job().state {
            JobState::Failed { next_retry_at, failed_at, .. } => {
                let delay = next_retry_at.unwrap() - *failed_at;
                assert_eq!(delay.num_milliseconds(), RETRY_BASE_MS as i64);
            }
            _ => panic!("expected failed"),
        }
    }

    #[test]
    fn test_backoff_caps_at_30s() {
        let mut sm = JobStateMachine::new(sample_job());
        sm.start("worker-1".to_string()).unwrap();
        let err = SyncError::new(SyncErrorKind::StoreUnavailable, "connection reset");
        sm.fail(&err, 10).unwrap(); // 100ms * 2^10 = 102400ms, should clamp to 30000ms
        match &sm.job().state {
            JobState::Failed { next_retry_at, failed_at, .. } => {
                let delay = next_retry_at.unwrap() - *failed_at;
                assert_eq!(delay.num_milliseconds(), RETRY_CAP_MS as i64);
            }
            _ => panic!("expected failed"),
        }
    }

    #[test]
    fn test_max_attempts_stops_retry_scheduling() {
        let mut sm = JobStateMachine::new(sample_job());
        sm.start("worker-1".to_string()).unwrap();
        let err = SyncError::new(SyncErrorKind::StoreUnavailable, "connection reset");
        sm.fail(&err, MAX_RETRY_ATTEMPTS).unwrap();
        match &sm.job().state {
            JobState::Failed { next_retry_at, .. } => assert!(next_retry_at.is_none()),
            _ => panic!("expected failed"),
        }
    }

    #[test]
    fn test_non_retryable_error_never_schedules_retry() {
        let mut sm = JobStateMachine::new(sample_job());
        sm.start("worker-1".to_string()).unwrap();
        let err = SyncError::new(SyncErrorKind::StoreConstraint, "duplicate id");
        sm.fail(&err, 0).unwrap();
        match &sm.job().state {
            JobState::Failed { next_retry_at, .. } => assert!(next_retry_at.is_none()),
            _ => panic!("expected failed"),
        }
    }

    #[test]
    fn test_cancel_from_queued() {
        let mut sm = JobStateMachine::new(sample_job());
        sm.cancel("user requested".to_string()).unwrap();
        assert!(matches!(sm.job().state, JobState::Cancelled { .. }));
    }

    #[test]
    fn test_cannot_cancel_completed_job() {
        let mut sm = JobStateMachine::new(sample_job());
        sm.start("worker-1".to_string()).unwrap();
        sm.complete(1, 0).unwrap();
        assert!(sm.cancel("too late".to_string()).is_err());
    }

    #[test]
    fn test_advance_updates_current_step() {
        let mut sm = JobStateMachine::new(sample_job());
        sm.start("worker-1".to_string()).unwrap();
        sm.advance(PipelineStep::WritingStores).unwrap();
        match &sm.job().state {
            JobState::Running { current_step, .. } => assert_eq!(*current_step, PipelineStep::WritingStores),
            _ => panic!("expected running"),
        }
    }
}
