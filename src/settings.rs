//! Free-form key/value settings (`system_config`).

use sqlx::SqlitePool;

use crate::error::{ApiError, ApiResult};
use crate::models::SystemConfigEntry;

pub async fn list(pool: &SqlitePool) -> ApiResult<Vec<SystemConfigEntry>> {
    Ok(
        sqlx::query_as::<_, SystemConfigEntry>("SELECT id, key, value FROM system_config ORDER BY key")
            .fetch_all(pool)
            .await?,
    )
}

/// Insert or overwrite the row for `key`.
pub async fn upsert(pool: &SqlitePool, key: &str, value: &str) -> ApiResult<SystemConfigEntry> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ApiError::BadRequest("key must not be empty".to_string()));
    }

    Ok(sqlx::query_as::<_, SystemConfigEntry>(
        "INSERT INTO system_config (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value
         RETURNING id, key, value",
    )
    .bind(key)
    .bind(value)
    .fetch_one(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_upsert_overwrites_by_key() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();

        let first = upsert(&pool, "theme", "dark").await.unwrap();
        let second = upsert(&pool, "theme", "light").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.value, "light");

        upsert(&pool, "banner", "hello").await.unwrap();
        let all = list(&pool).await.unwrap();
        let keys: Vec<_> = all.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["banner", "theme"]);

        assert!(upsert(&pool, "  ", "x").await.is_err());
    }
}
