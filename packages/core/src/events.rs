//! Event types for job lifecycle notifications.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobKind};

/// Events emitted by the job queue system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Job events
    /// A job was registered and is waiting for a worker.
    JobQueued {
        job_id: JobId,
        kind: JobKind,
        inputs: usize,
        timestamp: DateTime<Utc>,
    },
    /// A worker started converting a job.
    JobStarted {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A job produced its artifact.
    JobCompleted {
        job_id: JobId,
        result_path: PathBuf,
        count: usize,
        timestamp: DateTime<Utc>,
    },
    /// A job failed.
    JobFailed {
        job_id: JobId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A job's queue item went back on the channel for another delivery.
    JobRedelivered {
        job_id: JobId,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    /// A worker joined the pool.
    WorkerStarted {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker left the pool.
    WorkerStopped {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobQueued { timestamp, .. }
            | JobEvent::JobStarted { timestamp, .. }
            | JobEvent::JobCompleted { timestamp, .. }
            | JobEvent::JobFailed { timestamp, .. }
            | JobEvent::JobRedelivered { timestamp, .. }
            | JobEvent::WorkerStarted { timestamp, .. }
            | JobEvent::WorkerStopped { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobQueued { job_id, .. }
            | JobEvent::JobStarted { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobRedelivered { job_id, .. } => Some(*job_id),
            JobEvent::WorkerStarted { .. } | JobEvent::WorkerStopped { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobQueued {
                job_id,
                kind,
                inputs,
                ..
            } => format!("Job {} queued ({}, {} file(s))", job_id, kind, inputs),
            JobEvent::JobStarted { job_id, .. } => format!("Job {} started", job_id),
            JobEvent::JobCompleted {
                job_id,
                result_path,
                count,
                ..
            } => format!(
                "Job {} completed: {} ({} file(s))",
                job_id,
                result_path.display(),
                count
            ),
            JobEvent::JobFailed { job_id, error, .. } => {
                format!("Job {} failed: {}", job_id, error)
            }
            JobEvent::JobRedelivered {
                job_id, attempt, ..
            } => format!("Job {} redelivered (attempt {})", job_id, attempt),
            JobEvent::WorkerStarted { worker_id, .. } => format!("Worker {} started", worker_id),
            JobEvent::WorkerStopped { worker_id, .. } => format!("Worker {} stopped", worker_id),
        }
    }
}
