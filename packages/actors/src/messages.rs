//! Message types for actor communication.

use queue_core::{Delivery, JobError, JobId, QueueDepth, QueueItem};
use ractor::RpcReplyPort;

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Persist an item and make it available to workers.
    Enqueue {
        item: QueueItem,
        reply: RpcReplyPort<Result<(), JobError>>,
    },

    /// Hand the next item to a worker.
    ///
    /// The reply is held until an item is available; `None` means the
    /// queue is shutting down.
    Claim {
        worker_id: String,
        reply: RpcReplyPort<Option<Delivery>>,
    },

    /// The worker is done with the item, whatever the outcome.
    Ack { job_id: JobId },

    /// The worker gave the item back for another delivery.
    Nack { job_id: JobId },

    /// Return everything held by a worker that went away.
    ReleaseWorker { worker_id: String },

    /// Get pending and in-flight counts.
    GetDepth { reply: RpcReplyPort<QueueDepth> },

    /// Shutdown the queue.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Ask the queue for the next item.
    Poll,

    /// Convert a claimed item.
    Process { delivery: Box<Delivery> },

    /// Check if worker is idle.
    IsIdle { reply: RpcReplyPort<bool> },
}

/// A live worker as seen by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub idle: bool,
}

/// Messages for the Supervisor actor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Get the queue actor of the pool.
    GetQueue {
        reply: RpcReplyPort<ractor::ActorRef<QueueMessage>>,
    },

    /// List live workers.
    GetWorkers {
        reply: RpcReplyPort<Vec<WorkerInfo>>,
    },

    /// Periodic housekeeping.
    Tick,

    /// Stop workers, then the queue, then the supervisor.
    Shutdown,
}
