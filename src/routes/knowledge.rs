//! Knowledge file upload/removal and reload job inspection.

use axum::{
    extract::{Multipart, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::error::{ApiError, ApiResult};
use crate::jobs::JobInfo;
use crate::knowledge::{self, DeleteReceipt, UploadReceipt};
use crate::models::KnowledgeFile;
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .route("/files", get(list_files))
        .route("/files/{id}", delete(delete_file))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job).delete(cancel_job))
}

async fn upload(
    State(state): State<AppState>,
    _admin: AdminUser,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadReceipt>> {
    let ingestion = state.ingestion()?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("Uploaded file has no filename".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        return Ok(Json(ingestion.upload(&filename, &bytes).await?));
    }

    Err(ApiError::BadRequest("Missing multipart field 'file'".to_string()))
}

async fn list_files(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<KnowledgeFile>>> {
    Ok(Json(knowledge::list_files(&state.pool).await?))
}

async fn delete_file(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeleteReceipt>> {
    let ingestion = state.ingestion()?;
    Ok(Json(ingestion.delete(id).await?))
}

async fn list_jobs(State(state): State<AppState>, _admin: AdminUser) -> Json<Vec<JobInfo>> {
    Json(state.jobs.list())
}

async fn get_job(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobInfo>> {
    state
        .jobs
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))
}

async fn cancel_job(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobInfo>> {
    let ingestion = state.ingestion()?;
    Ok(Json(ingestion.cancel(id).await?))
}
