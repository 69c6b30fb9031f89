//! Server initialization for the conversion queue.

use std::sync::Arc;

use actors::{InvokerConfig, JobRegistry, PoolError, ProcessConverter, WorkerPool};
use db::repositories::QueueItemRepository;
use db::{DbConfig, DbError};
use queue_core::PoolConfig;
use storage::{FileStore, StorageConfig, StorageError};

use crate::gateway::Gateway;

/// Everything needed to bring the system up.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub db: DbConfig,
    pub storage: StorageConfig,
    pub pool: PoolConfig,
    pub invoker: InvokerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("database: {0}")]
    Db(#[from] DbError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("worker pool: {0}")]
    Pool(#[from] PoolError),
}

/// Initialize the conversion queue system.
///
/// This should be called once at server startup before handling requests.
/// Items left in the store by an earlier run are redelivered.
pub async fn init_gateway(config: GatewayConfig) -> Result<Gateway, InitError> {
    tracing::info!("Initializing conversion queue...");

    let db = db::init(&config.db).await?;
    let store = Arc::new(QueueItemRepository::new(db));

    let files = FileStore::new(config.storage)?;
    let pool_config = config.pool.with_results_dir(files.results_dir());

    let registry = Arc::new(JobRegistry::new());
    let converter = Arc::new(ProcessConverter::new(config.invoker));
    let pool = WorkerPool::start(pool_config, registry.clone(), converter, store).await?;

    tracing::info!("Conversion queue ready");
    Ok(Gateway::new(registry, Arc::new(pool), files))
}
