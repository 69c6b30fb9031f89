//! Submission and status logic behind the HTTP routes.

use std::path::PathBuf;
use std::sync::Arc;

use actors::{JobRegistry, RegistryStats, WorkerPool};
use queue_core::{Job, JobError, JobId, JobKind, QueueDepth, QueueItem};
use serde::Serialize;
use storage::FileStore;

use crate::error::{ApiError, ApiResult};

/// An accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub job_id: JobId,
    pub count: usize,
}

/// What a client sees when polling a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub status: &'static str,
    pub result_url: Option<String>,
    pub error: Option<String>,
    pub count: Option<usize>,
}

impl JobStatusView {
    fn new(job: &Job, files: &FileStore) -> Self {
        Self {
            status: job.status.as_str(),
            result_url: job.result_path().and_then(|p| files.result_url(p)),
            error: job.error().map(str::to_string),
            count: job.count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthView {
    pub status: &'static str,
    pub jobs: RegistryStats,
    pub queue: Option<QueueDepth>,
}

/// Accepts uploads, registers jobs and answers status queries.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<JobRegistry>,
    pool: Arc<WorkerPool>,
    files: FileStore,
}

impl Gateway {
    pub fn new(registry: Arc<JobRegistry>, pool: Arc<WorkerPool>, files: FileStore) -> Self {
        Self {
            registry,
            pool,
            files,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    /// Register a job over already stored uploads and enqueue it.
    ///
    /// When the item cannot be enqueued the job is discarded and its uploads
    /// deleted, so a failed submission leaves nothing behind.
    pub async fn submit(
        &self,
        job_id: JobId,
        kind: JobKind,
        inputs: Vec<PathBuf>,
    ) -> ApiResult<Submission> {
        if inputs.is_empty() {
            return Err(ApiError::BadRequest(
                match kind {
                    JobKind::Single => "No file uploaded",
                    JobKind::Batch => "No files uploaded",
                }
                .to_string(),
            ));
        }
        if kind == JobKind::Single && inputs.len() > 1 {
            self.files.remove_uploads(&inputs).await;
            return Err(ApiError::BadRequest("Expected a single file".to_string()));
        }

        let count = inputs.len();
        let registered = QueueItem::for_job(job_id, kind, inputs.clone())
            .and_then(|item| self.registry.create(job_id, kind, inputs.clone()).map(|_| item));
        let item = match registered {
            Ok(item) => item,
            Err(e) => {
                self.files.remove_uploads(&inputs).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.pool.enqueue(item).await {
            match self.registry.discard(job_id) {
                Ok(_) => {}
                // A worker already picked it up, so the item did reach the channel.
                Err(JobError::InvalidTransition { .. }) => {
                    tracing::warn!("Enqueue of {} reported {} but the job is running", job_id, e);
                    return Ok(Submission { job_id, count });
                }
                Err(discard_err) => {
                    tracing::warn!("Failed to discard job {}: {}", job_id, discard_err);
                }
            }
            self.files.remove_uploads(&inputs).await;
            return Err(e.into());
        }

        tracing::info!("Queued {} job {} with {} file(s)", kind, job_id, count);
        Ok(Submission { job_id, count })
    }

    /// Status of the job with the given textual ID.
    pub fn status(&self, raw_id: &str) -> ApiResult<JobStatusView> {
        let id = JobId::parse(raw_id).map_err(|_| ApiError::InvalidJobId)?;
        let job = self.registry.get(id)?;
        Ok(JobStatusView::new(&job, &self.files))
    }

    pub async fn health(&self) -> HealthView {
        let queue = self.pool.depth().await.ok();
        HealthView {
            status: if queue.is_some() { "ok" } else { "degraded" },
            jobs: self.registry.stats(),
            queue,
        }
    }

    /// Stop the worker pool, letting running conversions finish.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
