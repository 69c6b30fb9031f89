use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use queue_core::JobError;
use serde_json::json;
use storage::StorageError;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent JSON error responses of
/// the form `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A job queue error.
    #[error(transparent)]
    Job(#[from] JobError),

    /// Upload storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The multipart body could not be read.
    #[error(transparent)]
    Multipart(#[from] MultipartError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The job ID is not known or not a job ID at all.
    #[error("Invalid job ID")]
    InvalidJobId,
}

/// Convenience type alias for handler return values.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::InvalidJobId | ApiError::Job(JobError::NotFound(_)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Invalid job ID".to_string(),
            ),

            ApiError::Job(JobError::QueueUnavailable(reason)) => {
                tracing::error!(error = %reason, "Queue unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "QUEUE_UNAVAILABLE",
                    "Failed to queue job".to_string(),
                )
            }
            ApiError::Job(err @ JobError::DuplicateJobId(_)) => {
                (StatusCode::CONFLICT, "CONFLICT", err.to_string())
            }
            ApiError::Job(err @ (JobError::EmptyInputs(_) | JobError::TooManyInputs { .. })) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", err.to_string())
            }
            ApiError::Job(err) => {
                tracing::error!(error = %err, "Internal job error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }

            ApiError::Storage(err) => {
                tracing::error!(error = %err, "Storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }

            ApiError::Multipart(err) => {
                let status = err.status();
                let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
                    "PAYLOAD_TOO_LARGE"
                } else {
                    "BAD_REQUEST"
                };
                (status, code, err.body_text())
            }

            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use queue_core::JobId;

    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn maps_errors_to_status_codes() {
        assert_eq!(status_of(ApiError::InvalidJobId), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(JobError::NotFound(JobId::new()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(JobError::QueueUnavailable("down".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ApiError::BadRequest("No file uploaded".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                JobError::TooManyInputs {
                    id: JobId::new(),
                    count: 2
                }
                .into()
            ),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(JobError::UnknownJobKind("x".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
