//! Error taxonomy shared by the registry, the queue and the workers.

use std::path::PathBuf;
use std::time::Duration;

use crate::JobId;

/// Errors surfaced by the job queue system.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("conversion failed: {0}")]
    ConversionFailure(String),

    #[error("conversion timed out after {}s", .0.as_secs())]
    ConversionTimeout(Duration),

    #[error("duplicate job id: {0}")]
    DuplicateJobId(JobId),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("unknown job kind: {0}")]
    UnknownJobKind(String),

    #[error("malformed queue item: {0}")]
    MalformedItem(String),

    #[error("job {0} has no input files")]
    EmptyInputs(JobId),

    #[error("single job {id} takes one input file, got {count}")]
    TooManyInputs { id: JobId, count: usize },

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: &'static str,
        to: &'static str,
    },
}

/// Why one run of the external conversion program did not produce an artifact.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("failed to launch converter: {0}")]
    Launch(#[from] std::io::Error),

    #[error("converter exited with {}: {diagnostics}", exit_label(.exit_code))]
    Failure {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("converter timed out after {}s", .elapsed.as_secs())]
    Timeout { elapsed: Duration },

    #[error("converter produced no output at {}", .0.display())]
    MissingOutput(PathBuf),
}

impl ConversionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConversionError::Timeout { .. })
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "signal".to_string(),
    }
}

impl From<ConversionError> for JobError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::Timeout { elapsed } => JobError::ConversionTimeout(elapsed),
            other => JobError::ConversionFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn failure_message_carries_diagnostics() {
        let err = ConversionError::Failure {
            exit_code: Some(1),
            diagnostics: "corrupt pdf".into(),
        };
        assert_eq!(err.to_string(), "converter exited with code 1: corrupt pdf");
        let job_err = JobError::from(err);
        assert!(job_err.to_string().contains("corrupt pdf"));
    }

    #[test]
    fn timeout_maps_to_timeout() {
        let err = ConversionError::Timeout {
            elapsed: Duration::from_secs(3),
        };
        assert!(err.is_timeout());
        assert_matches!(JobError::from(err), JobError::ConversionTimeout(d) if d.as_secs() == 3);
    }
}
