//! Core data models shared by the store, the ingestion flow and the HTTP layer.
//!
//! Timestamps are stored as unix seconds and serialized as ISO 8601 strings.

use serde::{Deserialize, Serialize, Serializer};

/// An account. `chat_requests_count` is derived from the question log at
/// read time.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub is_active: bool,
    pub is_admin: bool,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
    #[sqlx(default)]
    pub chat_requests_count: i64,
}

/// One logged question/answer exchange.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserQuestion {
    pub id: i64,
    pub user_id: i64,
    pub question: String,
    pub answer: Option<String>,
    pub agent_used: Option<String>,
    pub success: bool,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SystemConfigEntry {
    pub id: i64,
    pub key: String,
    pub value: String,
}

/// Lifecycle of an uploaded knowledge file.
///
/// `Processing` is the only state with outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum IngestionStatus {
    Processing,
    Ingested,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Processing => "processing",
            IngestionStatus::Ingested => "ingested",
            IngestionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracking record for a staged knowledge file.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct KnowledgeFile {
    pub id: i64,
    pub filename: String,
    pub status: IngestionStatus,
    pub bytes: i64,
    pub sha256: String,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
    #[serde(serialize_with = "serialize_ts")]
    pub updated_at: i64,
}

/// A chunk of a staged file's extracted text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub filename: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn serialize_ts<S: Serializer>(ts: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_ts_iso(*ts))
}
