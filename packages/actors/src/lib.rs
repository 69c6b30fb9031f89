//! Actor system for the conversion queue.
//!
//! This crate provides the Ractor-based worker pool that drains the durable
//! work channel, plus the job registry and the converter seam.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that owns the queue and the workers
//! - `QueueActor` - Persists items and hands each to exactly one worker
//! - `WorkerActor` - Claims items and runs the converter on them
//! - `JobRegistry` - Authoritative, shared job status
//!
//! # Usage
//!
//! ```ignore
//! use actors::{JobRegistry, ProcessConverter, InvokerConfig, WorkerPool};
//!
//! let registry = Arc::new(JobRegistry::new());
//! let converter = Arc::new(ProcessConverter::new(InvokerConfig::default()));
//! let pool = WorkerPool::start(PoolConfig::default(), registry, converter, store).await?;
//!
//! pool.enqueue(QueueItem::single(job_id, path)).await?;
//! ```

mod converter;
mod invoker;
mod messages;
mod queue_actor;
pub mod registry;
mod supervisor;
mod worker_actor;

pub use converter::{
    ConversionFuture, ConversionOutput, ConversionRequest, ConversionResult, Converter,
    FnConverter,
};
pub use invoker::{CommandSpec, InvokerConfig, ProcessConverter};
pub use messages::{QueueMessage, SupervisorMessage, WorkerInfo, WorkerMessage};
pub use queue_actor::QueueActor;
pub use registry::{JobRegistry, RegistryStats};
pub use supervisor::{PoolError, Supervisor, WorkerPool};
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
