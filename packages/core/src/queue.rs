//! Queue wire types and worker pool configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{JobError, JobId, JobKind};

/// Name of the work channel every item is published on.
pub const DEFAULT_CHANNEL: &str = "pdf-processing";

/// Discriminator of a single-file item.
pub const PROCESS_PDF: &str = "processPDF";

/// Discriminator of a batch item.
pub const PROCESS_PDF_BATCH: &str = "processPDFBatch";

/// The durable envelope of a work request, as stored and delivered.
///
/// The discriminator stays an open string on the wire; [`QueueItem::decode`]
/// is the single place where it is turned into a [`JobRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub name: String,
    pub data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SinglePayload {
    job_id: JobId,
    file_path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchPayload {
    job_id: JobId,
    file_paths: Vec<PathBuf>,
}

impl QueueItem {
    /// Build the item for a one-file conversion.
    pub fn single(job_id: JobId, file_path: impl Into<PathBuf>) -> Self {
        Self {
            name: PROCESS_PDF.to_string(),
            data: json!({ "jobId": job_id, "filePath": file_path.into() }),
        }
    }

    /// Build the item for a batch conversion.
    pub fn batch(job_id: JobId, file_paths: Vec<PathBuf>) -> Self {
        Self {
            name: PROCESS_PDF_BATCH.to_string(),
            data: json!({ "jobId": job_id, "filePaths": file_paths }),
        }
    }

    /// Build the item matching a job's kind and inputs.
    pub fn for_job(job_id: JobId, kind: JobKind, inputs: Vec<PathBuf>) -> Result<Self, JobError> {
        kind.check_inputs(job_id, inputs.len())?;
        Ok(match kind {
            JobKind::Single => {
                let mut inputs = inputs;
                Self::single(job_id, inputs.remove(0))
            }
            JobKind::Batch => Self::batch(job_id, inputs),
        })
    }

    /// The `jobId` carried in the payload, read without interpreting the discriminator.
    pub fn job_id(&self) -> Option<JobId> {
        self.data
            .get("jobId")
            .and_then(Value::as_str)
            .and_then(|s| JobId::parse(s).ok())
    }

    /// Decode the envelope into a typed request.
    pub fn decode(&self) -> Result<JobRequest, JobError> {
        match self.name.as_str() {
            PROCESS_PDF => {
                let payload: SinglePayload = serde_json::from_value(self.data.clone())
                    .map_err(|e| JobError::MalformedItem(e.to_string()))?;
                Ok(JobRequest::Single {
                    job_id: payload.job_id,
                    file_path: payload.file_path,
                })
            }
            PROCESS_PDF_BATCH => {
                let payload: BatchPayload = serde_json::from_value(self.data.clone())
                    .map_err(|e| JobError::MalformedItem(e.to_string()))?;
                if payload.file_paths.is_empty() {
                    return Err(JobError::EmptyInputs(payload.job_id));
                }
                Ok(JobRequest::Batch {
                    job_id: payload.job_id,
                    file_paths: payload.file_paths,
                })
            }
            other => Err(JobError::UnknownJobKind(other.to_string())),
        }
    }
}

/// A decoded work request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    Single { job_id: JobId, file_path: PathBuf },
    Batch { job_id: JobId, file_paths: Vec<PathBuf> },
}

impl JobRequest {
    pub fn job_id(&self) -> JobId {
        match self {
            JobRequest::Single { job_id, .. } | JobRequest::Batch { job_id, .. } => *job_id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Single { .. } => JobKind::Single,
            JobRequest::Batch { .. } => JobKind::Batch,
        }
    }

    pub fn inputs(&self) -> &[PathBuf] {
        match self {
            JobRequest::Single { file_path, .. } => std::slice::from_ref(file_path),
            JobRequest::Batch { file_paths, .. } => file_paths,
        }
    }
}

/// An item handed to exactly one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Key of the item on the channel; acknowledgements refer to it.
    pub job_id: JobId,
    pub item: QueueItem,
    /// How many times this item has been delivered, starting at 1.
    pub attempt: u32,
}

/// Pending and in-flight counts of a work channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub pending: usize,
    pub in_flight: usize,
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Channel the pool consumes.
    pub channel: String,
    /// Number of concurrent workers.
    pub workers: usize,
    /// Failed conversions are redelivered while `attempt <= retry_limit`.
    pub retry_limit: u32,
    /// Terminal jobs older than this are dropped from the registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_ttl_secs: Option<u64>,
    /// Seconds between housekeeping ticks.
    pub tick_secs: u64,
    /// Where conversion artifacts are written.
    pub results_dir: PathBuf,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            workers: 2,
            retry_limit: 0,
            job_ttl_secs: None,
            tick_secs: 60,
            results_dir: PathBuf::from("./results"),
        }
    }
}

impl PoolConfig {
    /// Set the number of workers (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the results directory.
    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    /// Set the retry limit.
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Set the terminal job time-to-live.
    pub fn with_job_ttl(mut self, secs: Option<u64>) -> Self {
        self.job_ttl_secs = secs;
        self
    }

    /// Set the channel name.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn single_item_uses_wire_field_names() {
        let id = JobId::new();
        let item = QueueItem::single(id, "/up/a.pdf");
        let wire = serde_json::to_value(&item).unwrap();
        assert_eq!(wire["name"], "processPDF");
        assert_eq!(wire["data"]["jobId"], id.to_string());
        assert_eq!(wire["data"]["filePath"], "/up/a.pdf");

        let request = item.decode().unwrap();
        assert_eq!(request.job_id(), id);
        assert_eq!(request.kind(), JobKind::Single);
        assert_eq!(request.inputs(), &[PathBuf::from("/up/a.pdf")]);
    }

    #[test]
    fn batch_item_keeps_input_order() {
        let id = JobId::new();
        let inputs: Vec<PathBuf> = vec!["c.pdf".into(), "a.pdf".into(), "b.pdf".into()];
        let item = QueueItem::for_job(id, JobKind::Batch, inputs.clone()).unwrap();
        assert_eq!(item.name, PROCESS_PDF_BATCH);
        assert_eq!(item.data["filePaths"][0], "c.pdf");

        let request = item.decode().unwrap();
        assert_eq!(request.kind(), JobKind::Batch);
        assert_eq!(request.inputs(), inputs.as_slice());
    }

    #[test]
    fn single_item_never_becomes_a_batch() {
        let id = JobId::new();
        let inputs: Vec<PathBuf> = vec!["a.pdf".into(), "b.pdf".into()];

        assert_matches!(
            QueueItem::for_job(id, JobKind::Single, inputs),
            Err(JobError::TooManyInputs { count: 2, .. })
        );
        assert_matches!(
            QueueItem::for_job(id, JobKind::Batch, Vec::new()),
            Err(JobError::EmptyInputs(_))
        );

        let one = QueueItem::for_job(id, JobKind::Single, vec!["a.pdf".into()]).unwrap();
        assert_eq!(one.name, PROCESS_PDF);
    }

    #[test]
    fn unknown_discriminator_keeps_job_id() {
        let id = JobId::new();
        let item = QueueItem {
            name: "processWord".into(),
            data: json!({ "jobId": id.to_string(), "filePath": "x.docx" }),
        };
        assert_matches!(item.decode(), Err(JobError::UnknownJobKind(name)) if name == "processWord");
        assert_eq!(item.job_id(), Some(id));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let item = QueueItem {
            name: PROCESS_PDF.into(),
            data: json!({ "jobId": JobId::new().to_string() }),
        };
        assert_matches!(item.decode(), Err(JobError::MalformedItem(_)));

        let empty = QueueItem::batch(JobId::new(), Vec::new());
        assert_matches!(empty.decode(), Err(JobError::EmptyInputs(_)));
    }

    #[test]
    fn pool_config_defaults_are_small() {
        let config = PoolConfig::default();
        assert_eq!(config.channel, "pdf-processing");
        assert_eq!(config.workers, 2);
        assert_eq!(config.retry_limit, 0);
        assert_eq!(PoolConfig::default().with_workers(0).workers, 1);
    }
}
