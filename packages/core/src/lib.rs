//! Core domain types for the PDF conversion job queue.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobKind and JobStatus for conversion work
//! - QueueItem and JobRequest for the wire format of the work channel
//! - Events for lifecycle notifications
//! - The error taxonomy

mod error;
mod events;
mod job;
mod queue;

pub use error::{ConversionError, JobError};
pub use events::JobEvent;
pub use job::{Job, JobId, JobKind, JobStatus};
pub use queue::{
    DEFAULT_CHANNEL, Delivery, JobRequest, PROCESS_PDF, PROCESS_PDF_BATCH, PoolConfig, QueueDepth,
    QueueItem,
};
