//! Queue item repository backing the durable work channels.

use chrono::{DateTime, Utc};
use queue_core::{JobId, QueueItem};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use crate::{Database, DbError};

const TABLE: &str = "queue_item";

/// Delivery state of a stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Waiting for a worker.
    Pending,
    /// Handed to a worker, not yet acknowledged.
    Claimed,
}

/// A queue item as persisted, with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub job_id: JobId,
    pub channel: String,
    pub item: QueueItem,
    pub state: ItemState,
    /// Deliveries so far.
    pub deliveries: u32,
    pub worker_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct QueueItemRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    channel: String,
    name: String,
    data: serde_json::Value,
    state: ItemState,
    #[serde(default)]
    deliveries: u32,
    #[serde(default)]
    worker_id: Option<String>,
    enqueued_at: DateTime<Utc>,
}

impl QueueItemRecord {
    fn into_stored(self) -> Result<StoredItem, DbError> {
        let id_str = self.id.as_ref().map(|t| t.id.to_raw()).unwrap_or_default();
        let job_id = JobId::parse(&id_str)
            .map_err(|e| DbError::Serialization(format!("bad queue item id {id_str:?}: {e}")))?;

        Ok(StoredItem {
            job_id,
            channel: self.channel,
            item: QueueItem {
                name: self.name,
                data: self.data,
            },
            state: self.state,
            deliveries: self.deliveries,
            worker_id: self.worker_id,
            enqueued_at: self.enqueued_at,
        })
    }
}

/// Struct for creating items.
#[derive(Debug, Clone, Serialize)]
struct QueueItemCreate {
    channel: String,
    name: String,
    data: serde_json::Value,
    state: ItemState,
    deliveries: u32,
    enqueued_at: DateTime<Utc>,
    /// Microsecond timestamp used for ordering.
    seq: i64,
}

/// Repository for queue item persistence operations.
#[derive(Clone)]
pub struct QueueItemRepository {
    db: Database,
}

impl QueueItemRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new pending item for `job_id` on `channel`.
    pub async fn create(
        &self,
        channel: &str,
        job_id: JobId,
        item: &QueueItem,
    ) -> Result<StoredItem, DbError> {
        let now = Utc::now();
        let create_data = QueueItemCreate {
            channel: channel.to_string(),
            name: item.name.clone(),
            data: item.data.clone(),
            state: ItemState::Pending,
            deliveries: 0,
            enqueued_at: now,
            seq: now.timestamp_micros(),
        };

        let record: Option<QueueItemRecord> = self
            .db
            .create((TABLE, job_id.to_string()))
            .content(create_data)
            .await?;

        record
            .ok_or_else(|| DbError::Query("Failed to create queue item".into()))?
            .into_stored()
    }

    /// Get the item stored for a job.
    pub async fn get(&self, job_id: JobId) -> Result<StoredItem, DbError> {
        let record: Option<QueueItemRecord> = self.db.select((TABLE, job_id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Queue item not found: {}", job_id)))?
            .into_stored()
    }

    /// Record that a worker claimed the item.
    pub async fn mark_claimed(
        &self,
        job_id: JobId,
        worker_id: &str,
        deliveries: u32,
    ) -> Result<StoredItem, DbError> {
        let record: Option<QueueItemRecord> = self
            .db
            .update((TABLE, job_id.to_string()))
            .merge(serde_json::json!({
                "state": ItemState::Claimed,
                "worker_id": worker_id,
                "deliveries": deliveries,
                "claimed_at": Utc::now(),
            }))
            .await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Queue item not found: {}", job_id)))?
            .into_stored()
    }

    /// Put a claimed item back to pending.
    pub async fn release(&self, job_id: JobId) -> Result<StoredItem, DbError> {
        let record: Option<QueueItemRecord> = self
            .db
            .update((TABLE, job_id.to_string()))
            .merge(serde_json::json!({
                "state": ItemState::Pending,
                "worker_id": serde_json::Value::Null,
            }))
            .await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Queue item not found: {}", job_id)))?
            .into_stored()
    }

    /// Delete an acknowledged item.
    pub async fn delete(&self, job_id: JobId) -> Result<(), DbError> {
        let _: Option<QueueItemRecord> = self.db.delete((TABLE, job_id.to_string())).await?;
        Ok(())
    }

    /// All items of a channel in enqueue order, pending and claimed alike.
    pub async fn list_for_channel(&self, channel: &str) -> Result<Vec<StoredItem>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM queue_item WHERE channel = $channel ORDER BY seq ASC")
            .bind(("channel", channel.to_string()))
            .await?;

        let records: Vec<QueueItemRecord> = result.take(0)?;

        records.into_iter().map(QueueItemRecord::into_stored).collect()
    }
}
