//! Knowledge file tracking and the upload → reload → status flow.
//!
//! An upload inserts a `processing` record, stages the bytes on disk and
//! schedules a full knowledge reload as a tracked job. The job settles the
//! record to `ingested` or `failed`. Deleting a file removes the staged copy
//! and the record, then schedules a reload with no record to settle.
//!
//! Only names the index will pick up are accepted: they must match the
//! include globs and have an extractable extension.
//!
//! Reloads are serialized through a FIFO async mutex (the reload gate), so
//! every record's final status reflects its own reload. Status updates are
//! conditional on `status = 'processing'`, so each record transitions once.
//! Before touching its record a reload claims its outcome in the job
//! registry; a cancelled job never settles its record, and a job that has
//! claimed its outcome can no longer be cancelled.

use globset::GlobSet;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::KnowledgeBase;
use crate::error::{ApiError, ApiResult};
use crate::extract::DocumentKind;
use crate::jobs::{JobInfo, JobRegistry};
use crate::models::{now_ts, IngestionStatus, KnowledgeFile};

const SELECT_FILE: &str =
    "SELECT id, filename, status, bytes, sha256, created_at, updated_at FROM knowledge_files";

pub async fn list_files(pool: &SqlitePool) -> ApiResult<Vec<KnowledgeFile>> {
    let sql = format!("{} ORDER BY created_at DESC, id DESC", SELECT_FILE);
    Ok(sqlx::query_as::<_, KnowledgeFile>(&sql)
        .fetch_all(pool)
        .await?)
}

pub async fn get_file(pool: &SqlitePool, id: i64) -> ApiResult<Option<KnowledgeFile>> {
    let sql = format!("{} WHERE id = ?", SELECT_FILE);
    Ok(sqlx::query_as::<_, KnowledgeFile>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

pub async fn find_file(pool: &SqlitePool, filename: &str) -> ApiResult<Option<KnowledgeFile>> {
    let sql = format!("{} WHERE filename = ?", SELECT_FILE);
    Ok(sqlx::query_as::<_, KnowledgeFile>(&sql)
        .bind(filename)
        .fetch_optional(pool)
        .await?)
}

async fn insert_file(
    pool: &SqlitePool,
    filename: &str,
    bytes: i64,
    sha256: &str,
) -> ApiResult<KnowledgeFile> {
    let now = now_ts();
    Ok(sqlx::query_as::<_, KnowledgeFile>(
        "INSERT INTO knowledge_files (filename, status, bytes, sha256, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id, filename, status, bytes, sha256, created_at, updated_at",
    )
    .bind(filename)
    .bind(IngestionStatus::Processing)
    .bind(bytes)
    .bind(sha256)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?)
}

async fn delete_record(pool: &SqlitePool, id: i64) -> ApiResult<bool> {
    let result = sqlx::query("DELETE FROM knowledge_files WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Move a `processing` record to `status`. Returns false when the record is
/// gone or already settled.
pub async fn settle(pool: &SqlitePool, id: i64, status: IngestionStatus) -> ApiResult<bool> {
    let result = sqlx::query(
        "UPDATE knowledge_files SET status = ?, updated_at = ?
         WHERE id = ? AND status = 'processing'",
    )
    .bind(status)
    .bind(now_ts())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Reduce a client-supplied name to its final path component.
pub fn sanitize_filename(raw: &str) -> ApiResult<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(ApiError::BadRequest("Invalid filename".to_string()));
    }
    Ok(name.to_string())
}

#[derive(Debug, Serialize)]
pub struct UploadReceipt {
    pub id: i64,
    pub filename: String,
    pub status: IngestionStatus,
    pub job_id: Uuid,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteReceipt {
    pub message: String,
    pub job_id: Uuid,
}

/// What a reload settles: the triggering record, if any.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    pub file_id: Option<i64>,
    pub filename: String,
}

#[derive(Clone)]
pub struct IngestionCoordinator {
    pool: SqlitePool,
    staging_dir: PathBuf,
    include: GlobSet,
    knowledge: Arc<dyn KnowledgeBase>,
    jobs: Arc<JobRegistry>,
    gate: Arc<Mutex<()>>,
}

impl IngestionCoordinator {
    pub fn new(
        pool: SqlitePool,
        staging_dir: PathBuf,
        include: GlobSet,
        knowledge: Arc<dyn KnowledgeBase>,
        jobs: Arc<JobRegistry>,
    ) -> Self {
        Self {
            pool,
            staging_dir,
            include,
            knowledge,
            jobs,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Track and stage an uploaded file, then schedule a reload. Returns
    /// without waiting for ingestion.
    pub async fn upload(&self, raw_name: &str, bytes: &[u8]) -> ApiResult<UploadReceipt> {
        let filename = sanitize_filename(raw_name)?;
        if !self.accepts(&filename) {
            return Err(ApiError::BadRequest(format!(
                "Unsupported file type: '{}'. Upload PDF, DOCX, TXT or Markdown files.",
                filename
            )));
        }
        if find_file(&self.pool, &filename).await?.is_some() {
            return Err(ApiError::Conflict(format!(
                "File '{}' already exists",
                filename
            )));
        }

        let sha256 = hex::encode(Sha256::digest(bytes));
        let record = insert_file(&self.pool, &filename, bytes.len() as i64, &sha256).await?;

        if let Err(e) = stage(&self.staging_dir, &filename, bytes).await {
            if let Err(cleanup) = delete_record(&self.pool, record.id).await {
                error!(file_id = record.id, error = %cleanup, "failed to drop record after staging error");
            }
            return Err(ApiError::Internal(
                anyhow::Error::new(e).context(format!("failed to stage {}", filename)),
            ));
        }
        info!(file_id = record.id, filename = %filename, bytes = record.bytes, "knowledge file staged");

        let job_id = self.schedule_reload(ReloadTrigger {
            file_id: Some(record.id),
            filename: filename.clone(),
        });

        Ok(UploadReceipt {
            id: record.id,
            filename,
            status: record.status,
            job_id,
            message: "File uploaded. Knowledge ingestion started in the background.".to_string(),
        })
    }

    /// Whether a reload would index `filename`.
    pub fn accepts(&self, filename: &str) -> bool {
        self.include.is_match(filename) && DocumentKind::from_path(Path::new(filename)).is_some()
    }

    /// Remove a tracked file and schedule a reload without it.
    pub async fn delete(&self, file_id: i64) -> ApiResult<DeleteReceipt> {
        let record = get_file(&self.pool, file_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

        let path = self.staging_dir.join(&record.filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "staged file already gone");
            }
            Err(e) => {
                return Err(ApiError::Internal(
                    anyhow::Error::new(e).context(format!("failed to remove {}", path.display())),
                ))
            }
        }
        delete_record(&self.pool, file_id).await?;
        info!(file_id, filename = %record.filename, "knowledge file deleted");

        let job_id = self.schedule_reload(ReloadTrigger {
            file_id: None,
            filename: record.filename.clone(),
        });

        Ok(DeleteReceipt {
            message: format!(
                "File '{}' deleted. Knowledge reload started.",
                record.filename
            ),
            job_id,
        })
    }

    /// Register a reload job and spawn it behind the reload gate.
    pub fn schedule_reload(&self, trigger: ReloadTrigger) -> Uuid {
        let job = self.jobs.register(trigger.file_id, &trigger.filename);
        let this = self.clone();
        let job_id = job.id;
        let handle = tokio::spawn(async move { this.run_reload(job_id, trigger).await });
        self.jobs.attach(job_id, handle.abort_handle());
        job_id
    }

    /// Cancel a pending or running reload; its record, if any, becomes
    /// `failed`.
    pub async fn cancel(&self, job_id: Uuid) -> ApiResult<JobInfo> {
        let info = self.jobs.cancel(job_id)?;
        if let Some(file_id) = info.file_id {
            settle(&self.pool, file_id, IngestionStatus::Failed).await?;
        }
        info!(%job_id, filename = %info.filename, "reload cancelled");
        Ok(info)
    }

    async fn run_reload(&self, job_id: Uuid, trigger: ReloadTrigger) {
        let _gate = self.gate.lock().await;
        if !self.jobs.mark_running(job_id) {
            debug!(%job_id, "reload no longer queued, skipping");
            return;
        }
        info!(%job_id, filename = %trigger.filename, "knowledge reload started");

        let (status, outcome) = match self.knowledge.load(true).await {
            Ok(report) if trigger.file_id.is_some() && report.skipped.contains(&trigger.filename) => {
                warn!(%job_id, filename = %trigger.filename, "uploaded file produced no text");
                (
                    IngestionStatus::Failed,
                    Err(format!("{} could not be read", trigger.filename)),
                )
            }
            Ok(report) => {
                info!(%job_id, files = report.files, chunks = report.chunks, "knowledge reload finished");
                (IngestionStatus::Ingested, Ok(()))
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(%job_id, filename = %trigger.filename, error = %message, "knowledge reload failed");
                (IngestionStatus::Failed, Err(message))
            }
        };

        if !self.jobs.begin_settling(job_id) {
            debug!(%job_id, "reload was cancelled, leaving record to the canceller");
            return;
        }
        if let Some(file_id) = trigger.file_id {
            match settle(&self.pool, file_id, status).await {
                Ok(true) => info!(file_id, %status, "knowledge file settled"),
                Ok(false) => debug!(file_id, "knowledge file already settled or removed"),
                Err(e) => error!(file_id, error = %e, "failed to update knowledge file status"),
            }
        }
        self.jobs.finish(job_id, outcome);
    }
}

async fn stage(dir: &Path, filename: &str, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(filename), bytes).await
}
