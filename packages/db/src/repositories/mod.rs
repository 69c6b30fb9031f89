//! Repository implementations for database operations.

mod queue_item_repo;

pub use queue_item_repo::{ItemState, QueueItemRepository, StoredItem};
