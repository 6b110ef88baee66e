//! Local knowledge index over the staging directory.
//!
//! [`LocalKnowledge::load`] walks the staging directory, extracts and chunks
//! every matching file, embeds the chunks in batches and writes them to
//! `knowledge_chunks` in a single transaction. Nothing is written until every
//! embedding succeeded, so a failed load leaves the previous index intact.
//!
//! Retrieval is a brute-force cosine scan, which is fine for the handful of
//! documents an admin uploads.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::agent::{KnowledgeBase, LoadReport};
use crate::chunk::chunk_text;
use crate::config::KnowledgeConfig;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::extract::{extract_file, ExtractError};
use crate::models::Chunk;

/// A retrieved chunk.
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub filename: String,
    pub text: String,
    pub score: f32,
}

pub struct LocalKnowledge {
    pool: SqlitePool,
    staging_dir: PathBuf,
    include: GlobSet,
    max_tokens: usize,
    batch_size: usize,
    embedder: Arc<dyn Embedder>,
}

impl LocalKnowledge {
    pub fn new(
        knowledge: &KnowledgeConfig,
        batch_size: usize,
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        Ok(Self {
            pool,
            staging_dir: knowledge.staging_dir.clone(),
            include: build_globset(&knowledge.include_globs)?,
            max_tokens: knowledge.max_tokens,
            batch_size: batch_size.max(1),
            embedder,
        })
    }

    /// Staged files matching the include globs, as paths relative to the
    /// staging directory, sorted. A missing directory is empty.
    pub fn scan(&self) -> Result<Vec<String>> {
        scan_dir(&self.staging_dir, &self.include)
    }

    /// The `top_k` chunks most similar to `query`.
    pub async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Passage>> {
        let rows: Vec<(String, String, Vec<u8>)> =
            sqlx::query_as("SELECT filename, text, embedding FROM knowledge_chunks")
                .fetch_all(&self.pool)
                .await?;

        let mut passages: Vec<Passage> = rows
            .into_iter()
            .map(|(filename, text, blob)| Passage {
                score: cosine_similarity(query, &blob_to_vec(&blob)),
                filename,
                text,
            })
            .collect();
        passages.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        passages.truncate(top_k);
        Ok(passages)
    }

    async fn indexed_files(&self) -> Result<HashSet<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT DISTINCT filename FROM knowledge_chunks")
            .fetch_all(&self.pool)
            .await?;
        Ok(names.into_iter().collect())
    }

    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<(Chunk, Vec<f32>)>> {
        let mut out = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedding service returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                );
            }
            out.extend(batch.iter().cloned().zip(vectors));
        }
        Ok(out)
    }
}

#[async_trait]
impl KnowledgeBase for LocalKnowledge {
    async fn load(&self, recreate: bool) -> Result<LoadReport> {
        let files = self.scan()?;
        let already = if recreate {
            HashSet::new()
        } else {
            self.indexed_files().await?
        };

        let mut report = LoadReport::default();
        let mut embedded = Vec::new();

        for name in files {
            if already.contains(&name) {
                debug!(filename = %name, "already indexed, keeping");
                continue;
            }

            let path = self.staging_dir.join(&name);
            let text = match extract_isolated(move || extract_file(&path)).await {
                Ok(text) => text,
                Err(reason) => {
                    warn!(filename = %name, error = %reason, "skipping file");
                    report.skipped.push(name);
                    continue;
                }
            };

            let chunks = chunk_text(&name, &text, self.max_tokens);
            if chunks.is_empty() {
                warn!(filename = %name, "no text extracted, skipping file");
                report.skipped.push(name);
                continue;
            }

            embedded.extend(self.embed_chunks(chunks).await?);
            report.files += 1;
        }

        let mut tx = self.pool.begin().await?;
        if recreate {
            sqlx::query("DELETE FROM knowledge_chunks")
                .execute(&mut *tx)
                .await?;
        }
        for (chunk, vector) in &embedded {
            sqlx::query(
                "INSERT INTO knowledge_chunks (id, filename, chunk_index, text, hash, embedding)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(filename, chunk_index) DO UPDATE SET
                    id = excluded.id,
                    text = excluded.text,
                    hash = excluded.hash,
                    embedding = excluded.embedding",
            )
            .bind(&chunk.id)
            .bind(&chunk.filename)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        report.chunks = embedded.len();
        info!(
            files = report.files,
            chunks = report.chunks,
            skipped = report.skipped.len(),
            model = self.embedder.model_name(),
            recreate,
            "knowledge load finished"
        );
        Ok(report)
    }
}

/// Run an extraction on the blocking pool. Both extraction errors and a
/// panicking extractor (some malformed PDFs panic `pdf-extract`) come back
/// as `Err` so the caller can skip just that file.
async fn extract_isolated<F>(extract: F) -> std::result::Result<String, String>
where
    F: FnOnce() -> std::result::Result<String, ExtractError> + Send + 'static,
{
    match tokio::task::spawn_blocking(extract).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err("extractor panicked".to_string()),
        Err(e) => Err(format!("extraction task failed: {}", e)),
    }
}

fn scan_dir(root: &Path, include: &GlobSet) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let rel_str = relative.to_string_lossy().to_string();
        if include.is_match(&rel_str) {
            names.push(rel_str);
        }
    }
    names.sort();
    Ok(names)
}

/// Compile the knowledge include globs.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("bad glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
