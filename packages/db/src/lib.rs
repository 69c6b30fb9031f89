//! SurrealDB integration for the job queue system.
//!
//! This crate provides database connectivity and the durable storage behind
//! the work channels.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
mod store;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect_db};
pub use schema::init_schema;
pub use store::{QueueStore, StoreFuture};

/// Connect to the database and make sure the schema exists.
///
/// This should be called once at application startup.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect_db(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
