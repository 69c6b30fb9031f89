//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(QUEUE_ITEM_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Queue item table schema.
///
/// Records are keyed by job id, so a job has at most one stored item.
const QUEUE_ITEM_SCHEMA: &str = r#"
-- Durable items of the work channels
DEFINE TABLE IF NOT EXISTS queue_item SCHEMALESS;

-- Indexes for recovery scans
DEFINE INDEX IF NOT EXISTS queue_item_channel ON queue_item FIELDS channel;
DEFINE INDEX IF NOT EXISTS queue_item_state ON queue_item FIELDS channel, state;
"#;
