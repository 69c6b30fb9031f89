//! Upload and result file storage.
//!
//! Uploaded PDFs are written under the uploads directory through a local
//! `object_store` backend, named after the job they belong to. Conversion
//! artifacts are written by the external program straight into the results
//! directory, which is also served as static files.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use queue_core::JobId;

/// Longest sanitized file name kept from a client upload.
const MAX_NAME_LEN: usize = 120;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub uploads_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl StorageConfig {
    pub fn new(uploads_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            results_dir: results_dir.into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new("./uploads", "./results")
    }
}

#[derive(Clone)]
pub struct FileStore {
    uploads_root: PathBuf,
    results_root: PathBuf,
    uploads: Arc<dyn ObjectStore>,
}

impl FileStore {
    /// Create both directories and resolve them to absolute paths.
    pub fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let uploads_root = ensure_dir(&cfg.uploads_dir)?;
        let results_root = ensure_dir(&cfg.results_dir)?;
        if uploads_root == results_root {
            return Err(StorageError::InvalidConfig(
                "uploads and results must be different directories".to_string(),
            ));
        }

        let uploads = LocalFileSystem::new_with_prefix(&uploads_root)?;

        tracing::info!(
            "File storage ready: uploads={}, results={}",
            uploads_root.display(),
            results_root.display()
        );

        Ok(Self {
            uploads_root,
            results_root,
            uploads: Arc::new(uploads),
        })
    }

    pub fn uploads_dir(&self) -> &FsPath {
        &self.uploads_root
    }

    pub fn results_dir(&self) -> &FsPath {
        &self.results_root
    }

    /// Store one uploaded file of `job_id` and return its absolute path.
    ///
    /// `index` keeps files of the same batch apart even when clients send
    /// identical names.
    pub async fn save_upload(
        &self,
        job_id: JobId,
        index: usize,
        original_name: &str,
        bytes: Bytes,
    ) -> Result<PathBuf, StorageError> {
        let key = upload_key(job_id, index, original_name);
        self.uploads
            .put(&Path::from(key.as_str()), object_store::PutPayload::from(bytes))
            .await?;

        Ok(self.uploads_root.join(key))
    }

    /// Delete uploaded files, e.g. after a submission was rolled back.
    ///
    /// Missing files are ignored; other failures are logged.
    pub async fn remove_uploads(&self, paths: &[PathBuf]) {
        for path in paths {
            let Some(key) = path
                .strip_prefix(&self.uploads_root)
                .ok()
                .and_then(|p| p.to_str())
            else {
                tracing::warn!("Not an upload path: {}", path.display());
                continue;
            };

            match self.uploads.delete(&Path::from(key)).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => tracing::warn!("Failed to remove upload {}: {}", path.display(), e),
            }
        }
    }

    /// Public URL of a result file, served under `/results`.
    pub fn result_url(&self, result_path: &FsPath) -> Option<String> {
        result_path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| format!("/results/{name}"))
    }
}

fn upload_key(job_id: JobId, index: usize, original_name: &str) -> String {
    format!("{job_id}-{index}-{}", sanitize_file_name(original_name))
}

/// Reduce a client-supplied name to a safe single path segment.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload.pdf".to_string()
    } else {
        cleaned.to_string()
    }
}

fn ensure_dir(root: &FsPath) -> Result<PathBuf, StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(std::fs::canonicalize(root)?)
}
