#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use actors::{
    ConversionFuture, ConversionOutput, ConversionRequest, Converter, FnConverter, JobRegistry,
    WorkerPool,
};
use api::{Gateway, JobStatusView};
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use db::repositories::{QueueItemRepository, StoredItem};
use db::{DbConfig, DbError, QueueStore, StoreFuture};
use queue_core::{JobId, PoolConfig, QueueItem};
use storage::{FileStore, StorageConfig};
use tempfile::TempDir;

pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024;

/// A gateway over scratch directories. Keep `dir` alive for the test.
pub struct TestApp {
    pub gateway: Gateway,
    pub dir: TempDir,
}

impl TestApp {
    pub fn router(&self) -> Router {
        api::router(self.gateway.clone(), MAX_UPLOAD_BYTES)
    }

    /// Poll until the job is no longer queued or processing.
    pub async fn wait_for_terminal(&self, id: JobId) -> JobStatusView {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let view = self.gateway.status(&id.to_string()).expect("job exists");
                if view.status == "completed" || view.status == "failed" {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job did not finish in time")
    }
}

pub async fn test_app() -> TestApp {
    let db = db::init(&DbConfig::memory())
        .await
        .expect("in-memory database");
    test_app_with_store(Arc::new(QueueItemRepository::new(db))).await
}

pub async fn test_app_with_store(store: Arc<dyn QueueStore>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let files = FileStore::new(StorageConfig::new(
        dir.path().join("uploads"),
        dir.path().join("results"),
    ))
    .unwrap();

    let registry = Arc::new(JobRegistry::new());
    let pool = WorkerPool::start(
        PoolConfig::default().with_results_dir(files.results_dir()),
        registry.clone(),
        writing_converter(),
        store,
    )
    .await
    .unwrap();

    TestApp {
        gateway: Gateway::new(registry, Arc::new(pool), files),
        dir,
    }
}

/// Writes a small spreadsheet stand-in to the requested output.
pub fn writing_converter() -> Arc<dyn Converter> {
    Arc::new(FnConverter::new(|req: ConversionRequest| {
        Box::pin(async move {
            tokio::fs::write(&req.output, b"xlsx").await?;
            Ok(ConversionOutput::for_request(&req, Duration::ZERO))
        }) as ConversionFuture
    }))
}

/// A multipart/form-data request carrying `files` under `field`.
pub fn multipart_request(uri: &str, field: &str, files: &[(&str, &str)]) -> Request<Body> {
    let boundary = "----pdfqueue-test-boundary";
    let mut body = Vec::new();
    for (name, content) in files {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/pdf\r\n\r\n");
        body.extend_from_slice(content.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// A store whose writes always fail.
pub struct UnavailableStore;

impl QueueStore for UnavailableStore {
    fn insert<'a>(
        &'a self,
        _channel: &'a str,
        _job_id: JobId,
        _item: &'a QueueItem,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async { Err(DbError::Query("store offline".to_string())) })
    }

    fn mark_claimed<'a>(
        &'a self,
        _job_id: JobId,
        _worker_id: &'a str,
        _deliveries: u32,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async { Err(DbError::Query("store offline".to_string())) })
    }

    fn release(&self, _job_id: JobId) -> StoreFuture<'_, ()> {
        Box::pin(async { Err(DbError::Query("store offline".to_string())) })
    }

    fn remove(&self, _job_id: JobId) -> StoreFuture<'_, ()> {
        Box::pin(async { Err(DbError::Query("store offline".to_string())) })
    }

    fn load<'a>(&'a self, _channel: &'a str) -> StoreFuture<'a, Vec<StoredItem>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}
