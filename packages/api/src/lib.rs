//! HTTP API for the PDF conversion queue.
//!
//! This crate contains:
//! - Upload endpoints that store PDFs and enqueue conversion jobs
//! - Job status polling and result file serving
//! - Initialization of the database, storage and worker pool

mod error;
mod gateway;
mod init;
mod routes;

pub use error::{ApiError, ApiResult};
pub use gateway::{Gateway, HealthView, JobStatusView, Submission};
pub use init::{GatewayConfig, InitError, init_gateway};
pub use routes::{UploadResponse, api_routes, router};

// Re-export core types for convenience
pub use queue_core::{Job, JobEvent, JobId, JobKind, JobStatus};
