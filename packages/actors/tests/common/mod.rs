#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{ConversionFuture, ConversionOutput, ConversionRequest, Converter, FnConverter};
use db::repositories::{QueueItemRepository, StoredItem};
use db::{DbConfig, DbError, QueueStore, StoreFuture};
use queue_core::{ConversionError, Job, JobId, QueueItem};
use tokio::sync::Semaphore;

use actors::JobRegistry;

/// A queue store over a fresh in-memory datastore.
pub async fn memory_store() -> Arc<QueueItemRepository> {
    let db = db::init(&DbConfig::memory())
        .await
        .expect("in-memory database");
    Arc::new(QueueItemRepository::new(db))
}

/// Requests seen by a test converter.
pub type Calls = Arc<Mutex<Vec<ConversionRequest>>>;

/// Writes a small file to the requested output and succeeds.
pub fn writing_converter(calls: Calls) -> Arc<dyn Converter> {
    Arc::new(FnConverter::new(move |req: ConversionRequest| {
        let calls = calls.clone();
        Box::pin(async move {
            calls.lock().unwrap().push(req.clone());
            if let Some(parent) = req.output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&req.output, b"xlsx").await?;
            Ok(ConversionOutput::for_request(&req, Duration::ZERO))
        }) as ConversionFuture
    }))
}

/// Fails the first `failures` calls the way a crashing program would, then writes output.
pub fn flaky_converter(calls: Calls, failures: usize) -> Arc<dyn Converter> {
    Arc::new(FnConverter::new(move |req: ConversionRequest| {
        let calls = calls.clone();
        Box::pin(async move {
            let seen = {
                let mut calls = calls.lock().unwrap();
                calls.push(req.clone());
                calls.len()
            };
            if seen <= failures {
                return Err(ConversionError::Failure {
                    exit_code: Some(1),
                    diagnostics: "corrupt pdf".to_string(),
                });
            }
            if let Some(parent) = req.output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&req.output, b"xlsx").await?;
            Ok(ConversionOutput::for_request(&req, Duration::ZERO))
        }) as ConversionFuture
    }))
}

/// Panics on the first `panics` calls, which takes the worker down, then writes output.
pub fn panicking_converter(calls: Calls, panics: usize) -> Arc<dyn Converter> {
    Arc::new(FnConverter::new(move |req: ConversionRequest| {
        let calls = calls.clone();
        Box::pin(async move {
            let seen = {
                let mut calls = calls.lock().unwrap();
                calls.push(req.clone());
                calls.len()
            };
            if seen <= panics {
                panic!("converter crashed on call {seen}");
            }
            if let Some(parent) = req.output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&req.output, b"xlsx").await?;
            Ok(ConversionOutput::for_request(&req, Duration::ZERO))
        }) as ConversionFuture
    }))
}

/// Blocks conversions of `gated_input` until `gate` gets a permit; others run at once.
pub fn gated_converter(gate: Arc<Semaphore>, gated_input: &'static str) -> Arc<dyn Converter> {
    Arc::new(FnConverter::new(move |req: ConversionRequest| {
        let gate = gate.clone();
        Box::pin(async move {
            if req.inputs.iter().any(|p| p.ends_with(gated_input)) {
                let _permit = gate.acquire().await.expect("gate open");
            }
            if let Some(parent) = req.output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&req.output, b"xlsx").await?;
            Ok(ConversionOutput::for_request(&req, Duration::ZERO))
        }) as ConversionFuture
    }))
}

/// Poll the registry until `done` holds for the job.
pub async fn wait_for_status(registry: &JobRegistry, id: JobId, done: impl Fn(&Job) -> bool) -> Job {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let job = registry.get(id).expect("job registered");
            if done(&job) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job did not reach the expected status in time")
}

pub fn calls() -> Calls {
    Arc::new(Mutex::new(Vec::new()))
}

/// Poll the registry until the job reaches a terminal status.
pub async fn wait_for_terminal(registry: &JobRegistry, id: JobId) -> Job {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let job = registry.get(id).expect("job registered");
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job did not finish in time")
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
