//! Append-only question log.

use sqlx::SqlitePool;

use crate::error::ApiResult;
use crate::models::{now_ts, UserQuestion};

pub async fn record(
    pool: &SqlitePool,
    user_id: i64,
    question: &str,
    answer: Option<&str>,
    agent_used: Option<&str>,
    success: bool,
) -> ApiResult<UserQuestion> {
    let row = sqlx::query_as::<_, UserQuestion>(
        "INSERT INTO user_questions (user_id, question, answer, agent_used, success, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id, user_id, question, answer, agent_used, success, created_at",
    )
    .bind(user_id)
    .bind(question)
    .bind(answer)
    .bind(agent_used)
    .bind(success)
    .bind(now_ts())
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// A user's questions, newest first.
pub async fn history(pool: &SqlitePool, user_id: i64) -> ApiResult<Vec<UserQuestion>> {
    let rows = sqlx::query_as::<_, UserQuestion>(
        "SELECT id, user_id, question, answer, agent_used, success, created_at
         FROM user_questions
         WHERE user_id = ?
         ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
