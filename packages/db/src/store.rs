//! The persistence seam of the durable queue.

use std::future::Future;
use std::pin::Pin;

use queue_core::{JobId, QueueItem};

use crate::DbError;
use crate::repositories::{QueueItemRepository, StoredItem};

/// Future type returned by [`QueueStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DbError>> + Send + 'a>>;

/// Backing storage for a work channel.
///
/// Items are keyed by job id. An item stays stored until it is removed after
/// the worker acknowledged it, so anything left over after a restart is
/// redelivered.
pub trait QueueStore: Send + Sync + 'static {
    /// Persist a new pending item.
    fn insert<'a>(
        &'a self,
        channel: &'a str,
        job_id: JobId,
        item: &'a QueueItem,
    ) -> StoreFuture<'a, ()>;

    /// Record a delivery to `worker_id`.
    fn mark_claimed<'a>(
        &'a self,
        job_id: JobId,
        worker_id: &'a str,
        deliveries: u32,
    ) -> StoreFuture<'a, ()>;

    /// Return a claimed item to pending.
    fn release(&self, job_id: JobId) -> StoreFuture<'_, ()>;

    /// Drop an acknowledged item.
    fn remove(&self, job_id: JobId) -> StoreFuture<'_, ()>;

    /// Everything stored for `channel`, oldest first.
    fn load<'a>(&'a self, channel: &'a str) -> StoreFuture<'a, Vec<StoredItem>>;
}

impl QueueStore for QueueItemRepository {
    fn insert<'a>(
        &'a self,
        channel: &'a str,
        job_id: JobId,
        item: &'a QueueItem,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.create(channel, job_id, item).await?;
            Ok(())
        })
    }

    fn mark_claimed<'a>(
        &'a self,
        job_id: JobId,
        worker_id: &'a str,
        deliveries: u32,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            QueueItemRepository::mark_claimed(self, job_id, worker_id, deliveries).await?;
            Ok(())
        })
    }

    fn release(&self, job_id: JobId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            QueueItemRepository::release(self, job_id).await?;
            Ok(())
        })
    }

    fn remove(&self, job_id: JobId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.delete(job_id).await })
    }

    fn load<'a>(&'a self, channel: &'a str) -> StoreFuture<'a, Vec<StoredItem>> {
        Box::pin(async move { self.list_for_channel(channel).await })
    }
}
