//! Job domain types for conversion work.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::JobError;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a job converts: one PDF, or an ordered batch merged into one workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Single,
    Batch,
}

impl JobKind {
    /// File name of the artifact produced for `id`.
    pub fn output_file_name(self, id: JobId) -> String {
        match self {
            JobKind::Single => format!("result-{id}.xlsx"),
            JobKind::Batch => format!("batch-{id}.xlsx"),
        }
    }

    /// Output path for `id` inside `results_dir`.
    pub fn output_path(self, results_dir: &Path, id: JobId) -> PathBuf {
        results_dir.join(self.output_file_name(id))
    }

    /// Check that `count` input files fit this kind.
    pub fn check_inputs(self, id: JobId, count: usize) -> Result<(), JobError> {
        match (self, count) {
            (_, 0) => Err(JobError::EmptyInputs(id)),
            (JobKind::Single, count) if count > 1 => Err(JobError::TooManyInputs { id, count }),
            _ => Ok(()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Single => "single",
            JobKind::Batch => "batch",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a job in its lifecycle.
///
/// The result path and the error live inside their variants, so a job has a
/// result exactly when it is completed and an error exactly when it failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a worker.
    #[default]
    Queued,
    /// A worker claimed the job and the conversion is running.
    Processing { started_at: DateTime<Utc> },
    /// The conversion produced its artifact.
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        result_path: PathBuf,
        /// Number of input files that went into the artifact.
        count: usize,
    },
    /// The conversion failed.
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
    },
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing { .. } => "processing",
            JobStatus::Completed { .. } => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }

    /// Position in the `Queued -> Processing -> terminal` order.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing { .. } => 1,
            JobStatus::Completed { .. } | JobStatus::Failed { .. } => 2,
        }
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobStatus::Queued => None,
            JobStatus::Processing { started_at }
            | JobStatus::Completed { started_at, .. }
            | JobStatus::Failed { started_at, .. } => Some(*started_at),
        }
    }
}

/// A job is one client submission: a single PDF or a batch of PDFs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Input files in submission order. Never empty.
    pub inputs: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(id: JobId, kind: JobKind, inputs: Vec<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            status: JobStatus::Queued,
            inputs,
            created_at: now,
            updated_at: now,
        }
    }

    /// Path of the produced artifact, present only once completed.
    pub fn result_path(&self) -> Option<&Path> {
        match &self.status {
            JobStatus::Completed { result_path, .. } => Some(result_path),
            _ => None,
        }
    }

    /// Failure description, present only once failed.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Number of processed inputs, present only once completed.
    pub fn count(&self) -> Option<usize> {
        match &self.status {
            JobStatus::Completed { count, .. } => Some(*count),
            _ => None,
        }
    }

    /// When a worker first picked the job up.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.status.started_at()
    }

    /// Wall-clock conversion time for terminal jobs.
    pub fn duration_ms(&self) -> Option<u64> {
        let finished = match &self.status {
            JobStatus::Completed { completed_at, .. } => *completed_at,
            JobStatus::Failed { failed_at, .. } => *failed_at,
            _ => return None,
        };
        let started = self.started_at()?;
        u64::try_from((finished - started).num_milliseconds()).ok()
    }
}
