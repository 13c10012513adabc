// Job aggregate and control-surface errors
//
// The Job is owned by the orchestrator and mutated only through the
// state-machine methods below; everything else sees cloned snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What ended a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The source file is not a usable DBF table.
    Format,
    /// The profile cannot run against this table.
    Transform,
    /// The destination rejected a batch, or the retry budget ran out.
    Write,
    /// Operator-requested cancellation; not an engine error.
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled by operator")
    }
}

/// One migration job. Serde round-trips losslessly so external callers
/// can persist last-known state across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub filename: String,
    pub status: JobStatus,
    pub records_total: u64,
    /// Records that reached a committed batch. Excludes skips.
    pub records_processed: u64,
    /// Deleted, corrupt, and transform-failed records.
    pub records_skipped: u64,
    pub batches_committed: u32,
    /// Run attempt, starting at 1; a retry starts a fresh attempt.
    pub attempt: u32,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<JobFailure>,
}

impl Job {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            status: JobStatus::Pending,
            records_total: 0,
            records_processed: 0,
            records_skipped: 0,
            batches_committed: 0,
            attempt: 1,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            failure: None,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        if self.records_total == 0 {
            return 0.0;
        }
        (self.records_processed + self.records_skipped) as f64 / self.records_total as f64 * 100.0
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, failure: JobFailure) {
        self.status = JobStatus::Failed;
        self.failure = Some(failure);
        self.finished_at = Some(Utc::now());
    }

    /// A retry is a fresh run from record 0: counters reset, prior
    /// failure cleared, attempt incremented.
    pub(crate) fn reset_for_retry(&mut self) {
        self.status = JobStatus::Pending;
        self.records_total = 0;
        self.records_processed = 0;
        self.records_skipped = 0;
        self.batches_committed = 0;
        self.attempt += 1;
        self.started_at = None;
        self.finished_at = None;
        self.failure = None;
    }
}

/// Control-surface misuse.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id} is {}, operation requires {}", actual.as_str(), expected.as_str())]
    InvalidState {
        id: Uuid,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("job {0} cannot be retried: source data was not retained")]
    SourceUnavailable(Uuid),
}

/// The uploaded source: a filename plus where its bytes live.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub filename: String,
    pub data: SourceData,
}

#[derive(Debug, Clone)]
pub enum SourceData {
    Path(PathBuf),
    /// An uploaded byte stream, retained so a retry can re-read from
    /// record 0 without a re-upload.
    Bytes(Arc<Vec<u8>>),
}

impl SourceFile {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            data: SourceData::Path(path.to_path_buf()),
        }
    }

    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            data: SourceData::Bytes(Arc::new(bytes)),
        }
    }
}
