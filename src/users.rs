//! User accounts in SQLite.
//!
//! Reads always include `chat_requests_count`, computed from the question
//! log. Deleting a user deletes their questions in the same transaction.

use serde::Deserialize;
use sqlx::SqlitePool;

use crate::error::{ApiError, ApiResult};
use crate::models::{now_ts, User};

const SELECT_USER: &str = r#"
    SELECT u.id, u.username, u.email, u.hashed_password, u.is_active, u.is_admin, u.created_at,
           (SELECT COUNT(*) FROM user_questions q WHERE q.user_id = u.id) AS chat_requests_count
    FROM users u
"#;

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub hashed_password: &'a str,
    pub is_admin: bool,
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
}

pub async fn create(pool: &SqlitePool, new: NewUser<'_>) -> ApiResult<User> {
    ensure_unique(pool, Some(new.username), Some(new.email), None).await?;

    let id = sqlx::query(
        "INSERT INTO users (username, email, hashed_password, is_active, is_admin, created_at)
         VALUES (?, ?, ?, 1, ?, ?)",
    )
    .bind(new.username)
    .bind(new.email)
    .bind(new.hashed_password)
    .bind(new.is_admin)
    .bind(now_ts())
    .execute(pool)
    .await?
    .last_insert_rowid();

    get(pool, id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("user {} vanished after insert", id)))
}

pub async fn get(pool: &SqlitePool, id: i64) -> ApiResult<Option<User>> {
    let sql = format!("{} WHERE u.id = ?", SELECT_USER);
    Ok(sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

pub async fn find_by_username(pool: &SqlitePool, username: &str) -> ApiResult<Option<User>> {
    let sql = format!("{} WHERE u.username = ?", SELECT_USER);
    Ok(sqlx::query_as::<_, User>(&sql)
        .bind(username)
        .fetch_optional(pool)
        .await?)
}

pub async fn list(pool: &SqlitePool) -> ApiResult<Vec<User>> {
    let sql = format!("{} ORDER BY u.id", SELECT_USER);
    Ok(sqlx::query_as::<_, User>(&sql).fetch_all(pool).await?)
}

pub async fn update(pool: &SqlitePool, id: i64, changes: &UserUpdate) -> ApiResult<Option<User>> {
    if get(pool, id).await?.is_none() {
        return Ok(None);
    }
    ensure_unique(
        pool,
        changes.username.as_deref(),
        changes.email.as_deref(),
        Some(id),
    )
    .await?;

    sqlx::query(
        "UPDATE users SET
            username = COALESCE(?, username),
            email = COALESCE(?, email),
            is_active = COALESCE(?, is_active),
            is_admin = COALESCE(?, is_admin)
         WHERE id = ?",
    )
    .bind(changes.username.as_deref())
    .bind(changes.email.as_deref())
    .bind(changes.is_active)
    .bind(changes.is_admin)
    .bind(id)
    .execute(pool)
    .await?;

    get(pool, id).await
}

/// Returns false when no such user exists.
pub async fn delete(pool: &SqlitePool, id: i64) -> ApiResult<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM user_questions WHERE user_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    Ok(deleted > 0)
}

/// Delete every non-admin user and their questions. Returns the removed users.
pub async fn prune_non_admin(pool: &SqlitePool) -> ApiResult<Vec<User>> {
    let sql = format!("{} WHERE u.is_admin = 0 ORDER BY u.id", SELECT_USER);
    let doomed = sqlx::query_as::<_, User>(&sql).fetch_all(pool).await?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM user_questions WHERE user_id IN (SELECT id FROM users WHERE is_admin = 0)",
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM users WHERE is_admin = 0")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(doomed)
}

pub fn validate_username(username: &str) -> ApiResult<()> {
    if username.is_empty() || username.chars().any(char::is_whitespace) {
        return Err(ApiError::BadRequest(
            "Username must be non-empty and contain no whitespace".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> ApiResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(ApiError::BadRequest("Invalid email address".to_string()));
    }
    Ok(())
}

/// Reject a username or email already held by another account.
async fn ensure_unique(
    pool: &SqlitePool,
    username: Option<&str>,
    email: Option<&str>,
    exclude_id: Option<i64>,
) -> ApiResult<()> {
    let exclude = exclude_id.unwrap_or(-1);

    if let Some(email) = email {
        let taken: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ? AND id != ?")
            .bind(email)
            .bind(exclude)
            .fetch_optional(pool)
            .await?;
        if taken.is_some() {
            return Err(ApiError::Conflict("Email already registered".to_string()));
        }
    }
    if let Some(username) = username {
        let taken: Option<i64> =
            sqlx::query_scalar("SELECT id FROM users WHERE username = ? AND id != ?")
                .bind(username)
                .bind(exclude)
                .fetch_optional(pool)
                .await?;
        if taken.is_some() {
            return Err(ApiError::Conflict("Username already taken".to_string()));
        }
    }
    Ok(())
}
