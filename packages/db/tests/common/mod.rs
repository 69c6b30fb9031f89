use db::repositories::QueueItemRepository;
use db::{DbConfig, DbError};

/// A repository over a fresh in-memory datastore.
pub async fn setup_repo() -> Result<QueueItemRepository, DbError> {
    let db = db::init(&DbConfig::memory()).await?;
    Ok(QueueItemRepository::new(db))
}
