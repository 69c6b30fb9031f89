//! HTTP routes.

use std::path::PathBuf;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use queue_core::{JobId, JobKind};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::ApiResult;
use crate::gateway::{Gateway, HealthView, JobStatusView};

/// Response to an accepted upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

/// Build the full router: the upload API, result files and health.
pub fn router(gateway: Gateway, max_upload_bytes: usize) -> Router {
    let results = ServeDir::new(gateway.files().results_dir());

    // CORS layer - must be added first (outermost)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes(max_upload_bytes))
        .nest_service("/results", results)
        .with_state(gateway)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Build the `/api` routes.
pub fn api_routes(max_upload_bytes: usize) -> Router<Gateway> {
    Router::new()
        .route(
            "/upload",
            post(upload_single).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/upload-batch",
            post(upload_batch).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/status/{job_id}", get(job_status))
}

/// POST /api/upload - one PDF in the `file` field
async fn upload_single(
    State(gateway): State<Gateway>,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let job_id = JobId::new();
    let inputs = receive_files(&gateway, multipart, "file", job_id).await?;
    let submission = gateway.submit(job_id, JobKind::Single, inputs).await?;

    Ok(Json(UploadResponse {
        job_id: submission.job_id,
        count: None,
    }))
}

/// POST /api/upload-batch - many PDFs in the `files` field
async fn upload_batch(
    State(gateway): State<Gateway>,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let job_id = JobId::new();
    let inputs = receive_files(&gateway, multipart, "files", job_id).await?;
    let submission = gateway.submit(job_id, JobKind::Batch, inputs).await?;

    Ok(Json(UploadResponse {
        job_id: submission.job_id,
        count: Some(submission.count),
    }))
}

/// GET /api/status/{job_id}
async fn job_status(
    State(gateway): State<Gateway>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    gateway.status(&job_id).map(Json)
}

/// GET /health
async fn health(State(gateway): State<Gateway>) -> Json<HealthView> {
    Json(gateway.health().await)
}

/// Store every file sent under `field_name`, in order.
///
/// Other fields are skipped. If reading fails half way, files already
/// stored are removed again.
async fn receive_files(
    gateway: &Gateway,
    mut multipart: Multipart,
    field_name: &str,
    job_id: JobId,
) -> ApiResult<Vec<PathBuf>> {
    let mut saved = Vec::new();

    let received: ApiResult<()> = async {
        while let Some(field) = multipart.next_field().await? {
            if field.name() != Some(field_name) {
                continue;
            }
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            if bytes.is_empty() {
                tracing::warn!("Skipping empty upload {:?}", file_name);
                continue;
            }

            let path = gateway
                .files()
                .save_upload(job_id, saved.len(), &file_name, bytes)
                .await?;
            tracing::debug!("Stored upload {} ({})", path.display(), file_name);
            saved.push(path);
        }
        Ok(())
    }
    .await;

    if let Err(e) = received {
        gateway.files().remove_uploads(&saved).await;
        return Err(e);
    }
    Ok(saved)
}
