//! Job registry: the single writable source of truth for job status.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use queue_core::{Job, JobError, JobEvent, JobId, JobKind, JobStatus};
use serde::Serialize;
use tokio::sync::broadcast;

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-memory registry of every job known to this process.
///
/// Each update swaps the whole [`JobStatus`] of one job under the write lock,
/// so readers see either the old or the new `(status, result, error)` triple.
/// Transitions only move forward along `Queued -> Processing -> terminal`:
///
/// - repeating a transition with the same outcome is a no-op,
/// - a different outcome on a terminal job is rejected and the first
///   terminal write is kept.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
    events: broadcast::Sender<JobEvent>,
}

impl JobRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            jobs: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Sender for lifecycle events, shared with the worker pool.
    pub fn events(&self) -> broadcast::Sender<JobEvent> {
        self.events.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: JobEvent) {
        tracing::debug!("{}", event.description());
        let _ = self.events.send(event);
    }

    /// Register a new queued job.
    pub fn create(&self, id: JobId, kind: JobKind, inputs: Vec<PathBuf>) -> Result<Job, JobError> {
        kind.check_inputs(id, inputs.len())?;

        let job = {
            let mut jobs = self.write();
            if jobs.contains_key(&id) {
                return Err(JobError::DuplicateJobId(id));
            }
            let job = Job::new(id, kind, inputs);
            jobs.insert(id, job.clone());
            job
        };

        self.publish(JobEvent::JobQueued {
            job_id: id,
            kind,
            inputs: job.inputs.len(),
            timestamp: job.created_at,
        });
        Ok(job)
    }

    /// Register a job recovered from the durable queue, unless it is already known.
    ///
    /// Returns `true` when the job was added.
    pub fn restore(&self, id: JobId, kind: JobKind, inputs: Vec<PathBuf>) -> bool {
        match self.create(id, kind, inputs) {
            Ok(_) => true,
            Err(JobError::DuplicateJobId(_)) => false,
            Err(e) => {
                tracing::warn!("Could not restore job {}: {}", id, e);
                false
            }
        }
    }

    /// Snapshot of a job.
    pub fn get(&self, id: JobId) -> Result<Job, JobError> {
        self.read().get(&id).cloned().ok_or(JobError::NotFound(id))
    }

    /// Check if a job exists.
    pub fn contains(&self, id: JobId) -> bool {
        self.read().contains_key(&id)
    }

    /// A worker started on the job.
    pub fn mark_processing(&self, id: JobId) -> Result<Job, JobError> {
        let job = {
            let mut jobs = self.write();
            let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
            match &job.status {
                JobStatus::Queued => {}
                // Redelivery of a job whose first run never finished.
                JobStatus::Processing { .. } => return Ok(job.clone()),
                other => return Err(invalid(id, other, "processing")),
            }
            let now = Utc::now();
            job.status = JobStatus::Processing { started_at: now };
            job.updated_at = now;
            job.clone()
        };

        self.publish(JobEvent::JobStarted {
            job_id: id,
            timestamp: job.updated_at,
        });
        Ok(job)
    }

    /// The conversion produced `result_path` out of `count` inputs.
    pub fn mark_completed(
        &self,
        id: JobId,
        result_path: PathBuf,
        count: usize,
    ) -> Result<Job, JobError> {
        let job = {
            let mut jobs = self.write();
            let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
            let started_at = match &job.status {
                JobStatus::Processing { started_at } => *started_at,
                JobStatus::Completed {
                    result_path: done_path,
                    count: done_count,
                    ..
                } if *done_path == result_path && *done_count == count => {
                    return Ok(job.clone());
                }
                other => return Err(invalid(id, other, "completed")),
            };
            let now = Utc::now();
            job.status = JobStatus::Completed {
                started_at,
                completed_at: now,
                result_path: result_path.clone(),
                count,
            };
            job.updated_at = now;
            job.clone()
        };

        self.publish(JobEvent::JobCompleted {
            job_id: id,
            result_path,
            count,
            timestamp: job.updated_at,
        });
        Ok(job)
    }

    /// The conversion failed with `error`.
    pub fn mark_failed(&self, id: JobId, error: impl Into<String>) -> Result<Job, JobError> {
        let error = error.into();
        let job = {
            let mut jobs = self.write();
            let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
            let started_at = match &job.status {
                JobStatus::Processing { started_at } => *started_at,
                JobStatus::Failed {
                    error: recorded, ..
                } if *recorded == error => return Ok(job.clone()),
                other => return Err(invalid(id, other, "failed")),
            };
            let now = Utc::now();
            job.status = JobStatus::Failed {
                started_at,
                failed_at: now,
                error: error.clone(),
            };
            job.updated_at = now;
            job.clone()
        };

        self.publish(JobEvent::JobFailed {
            job_id: id,
            error,
            timestamp: job.updated_at,
        });
        Ok(job)
    }

    /// Remove a job that never reached the queue.
    ///
    /// Only queued jobs can be discarded; anything a worker touched stays.
    pub fn discard(&self, id: JobId) -> Result<Job, JobError> {
        let mut jobs = self.write();
        match jobs.get(&id) {
            None => Err(JobError::NotFound(id)),
            Some(job) if job.status != JobStatus::Queued => Err(invalid(id, &job.status, "discarded")),
            Some(_) => jobs.remove(&id).ok_or(JobError::NotFound(id)),
        }
    }

    /// Count jobs by status.
    pub fn stats(&self) -> RegistryStats {
        let jobs = self.read();
        let mut stats = RegistryStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing { .. } => stats.processing += 1,
                JobStatus::Completed { .. } => stats.completed += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
            }
        }
        stats
    }

    /// Drop terminal jobs not updated for `older_than`. Returns how many were removed.
    pub fn prune_terminal(&self, older_than: chrono::Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(id: JobId, from: &JobStatus, to: &'static str) -> JobError {
    JobError::InvalidTransition {
        id,
        from: from.as_str(),
        to,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn single(registry: &JobRegistry) -> JobId {
        let id = JobId::new();
        registry
            .create(id, JobKind::Single, vec!["a.pdf".into()])
            .unwrap();
        id
    }

    #[test]
    fn created_job_is_queued() {
        let registry = JobRegistry::new();
        let id = single(&registry);

        let job = registry.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.result_path(), None);
        assert_eq!(job.error(), None);
    }

    #[test]
    fn duplicate_and_empty_are_errors() {
        let registry = JobRegistry::new();
        let id = single(&registry);

        assert_matches!(
            registry.create(id, JobKind::Single, vec!["b.pdf".into()]),
            Err(JobError::DuplicateJobId(dup)) if dup == id
        );
        assert_eq!(registry.get(id).unwrap().inputs, vec![PathBuf::from("a.pdf")]);

        assert_matches!(
            registry.create(JobId::new(), JobKind::Batch, Vec::new()),
            Err(JobError::EmptyInputs(_))
        );
    }

    #[test]
    fn single_job_with_many_inputs_is_rejected() {
        let registry = JobRegistry::new();
        let id = JobId::new();

        assert_matches!(
            registry.create(id, JobKind::Single, vec!["a.pdf".into(), "b.pdf".into()]),
            Err(JobError::TooManyInputs { id: rejected, count: 2 }) if rejected == id
        );
        assert_matches!(registry.get(id), Err(JobError::NotFound(_)));
        assert!(registry.is_empty());

        registry
            .create(JobId::new(), JobKind::Batch, vec!["a.pdf".into(), "b.pdf".into()])
            .unwrap();
    }

    #[test]
    fn unknown_id_is_not_found() {
        let registry = JobRegistry::new();
        let id = JobId::new();
        assert_matches!(registry.get(id), Err(JobError::NotFound(missing)) if missing == id);
        assert_matches!(registry.mark_processing(id), Err(JobError::NotFound(_)));
    }

    #[test]
    fn happy_path_sets_result() {
        let registry = JobRegistry::new();
        let id = single(&registry);

        registry.mark_processing(id).unwrap();
        let job = registry
            .mark_completed(id, "result.xlsx".into(), 1)
            .unwrap();

        assert_eq!(job.status.as_str(), "completed");
        assert_eq!(job.result_path(), Some(std::path::Path::new("result.xlsx")));
        assert_eq!(job.error(), None);
        assert_eq!(job.count(), Some(1));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let registry = JobRegistry::new();
        let id = single(&registry);
        registry.mark_processing(id).unwrap();
        registry.mark_completed(id, "r.xlsx".into(), 1).unwrap();

        // Same outcome again is fine.
        registry.mark_completed(id, "r.xlsx".into(), 1).unwrap();

        assert_matches!(
            registry.mark_processing(id),
            Err(JobError::InvalidTransition { from: "completed", to: "processing", .. })
        );
        assert_matches!(
            registry.mark_failed(id, "late failure"),
            Err(JobError::InvalidTransition { from: "completed", to: "failed", .. })
        );
        assert_matches!(
            registry.mark_completed(id, "other.xlsx".into(), 1),
            Err(JobError::InvalidTransition { .. })
        );

        let job = registry.get(id).unwrap();
        assert_eq!(job.result_path(), Some(std::path::Path::new("r.xlsx")));
        assert_eq!(job.error(), None);
    }

    #[test]
    fn failure_is_idempotent() {
        let registry = JobRegistry::new();
        let id = single(&registry);
        registry.mark_processing(id).unwrap();
        registry.mark_processing(id).unwrap();

        registry.mark_failed(id, "corrupt pdf").unwrap();
        registry.mark_failed(id, "corrupt pdf").unwrap();
        assert_matches!(
            registry.mark_completed(id, "r.xlsx".into(), 1),
            Err(JobError::InvalidTransition { .. })
        );

        let job = registry.get(id).unwrap();
        assert_eq!(job.error(), Some("corrupt pdf"));
        assert_eq!(job.result_path(), None);
    }

    #[test]
    fn completion_requires_processing() {
        let registry = JobRegistry::new();
        let id = single(&registry);
        assert_matches!(
            registry.mark_completed(id, "r.xlsx".into(), 1),
            Err(JobError::InvalidTransition { from: "queued", .. })
        );
        assert_eq!(registry.get(id).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn completing_one_job_leaves_others_alone() {
        let registry = JobRegistry::new();
        let b = single(&registry);
        let a = single(&registry);

        registry.mark_processing(a).unwrap();
        registry.mark_completed(a, "result-a.xlsx".into(), 1).unwrap();

        let job_b = registry.get(b).unwrap();
        assert_eq!(job_b.status, JobStatus::Queued);
        assert_eq!(job_b.result_path(), None);
    }

    #[test]
    fn discard_only_removes_queued_jobs() {
        let registry = JobRegistry::new();
        let queued = single(&registry);
        let running = single(&registry);
        registry.mark_processing(running).unwrap();

        registry.discard(queued).unwrap();
        assert_matches!(registry.get(queued), Err(JobError::NotFound(_)));

        assert_matches!(registry.discard(running), Err(JobError::InvalidTransition { .. }));
        assert!(registry.contains(running));
    }

    #[test]
    fn restore_skips_known_jobs() {
        let registry = JobRegistry::new();
        let id = single(&registry);
        assert!(!registry.restore(id, JobKind::Single, vec!["x.pdf".into()]));
        assert!(registry.restore(JobId::new(), JobKind::Batch, vec!["x.pdf".into()]));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn stats_and_pruning() {
        let registry = JobRegistry::new();
        let queued = single(&registry);
        let done = single(&registry);
        let failed = single(&registry);
        registry.mark_processing(done).unwrap();
        registry.mark_completed(done, "r.xlsx".into(), 1).unwrap();
        registry.mark_processing(failed).unwrap();
        registry.mark_failed(failed, "boom").unwrap();

        assert_eq!(
            registry.stats(),
            RegistryStats {
                queued: 1,
                processing: 0,
                completed: 1,
                failed: 1,
            }
        );

        assert_eq!(registry.prune_terminal(chrono::Duration::hours(1)), 0);
        assert_eq!(registry.prune_terminal(chrono::Duration::zero() - chrono::Duration::seconds(1)), 2);
        assert!(registry.contains(queued));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn transitions_publish_events() {
        let registry = JobRegistry::new();
        let mut events = registry.subscribe();
        let id = single(&registry);
        registry.mark_processing(id).unwrap();
        registry.mark_completed(id, "r.xlsx".into(), 1).unwrap();

        assert_matches!(events.recv().await, Ok(JobEvent::JobQueued { job_id, .. }) if job_id == id);
        assert_matches!(events.recv().await, Ok(JobEvent::JobStarted { job_id, .. }) if job_id == id);
        assert_matches!(
            events.recv().await,
            Ok(JobEvent::JobCompleted { job_id, result_path, .. })
                if job_id == id && result_path == PathBuf::from("r.xlsx")
        );
    }
}
