use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{Pool, Postgres, Row};

use githarvest_core::CacheStore;

/// Slow cache tier in the `fetch_cache` table. Rows expire by TTL; an
/// expired row reads as a miss and is replaced by the next put.
pub struct PgCacheStore {
    pool: Pool<Postgres>,
    ttl_secs: i64,
}

impl PgCacheStore {
    pub fn new(pool: Pool<Postgres>, ttl_secs: i64) -> Self {
        Self { pool, ttl_secs }
    }

    /// Housekeeping; correctness never depends on it since reads filter by
    /// `expires_at` anyway.
    pub async fn purge_expired(&self) -> crate::Result<u64> {
        let result = sqlx::query("DELETE FROM fetch_cache WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get(&self, key: &str) -> githarvest_core::Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM fetch_cache WHERE key = $1 AND expires_at > NOW()")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| githarvest_core::Error::Cache(e.to_string()))?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn put(&self, key: &str, value: &str) -> githarvest_core::Result<()> {
        let expires_at = Utc::now() + Duration::seconds(self.ttl_secs);
        sqlx::query(
            r#"
            INSERT INTO fetch_cache (key, value, inserted_at, expires_at)
            VALUES ($1, $2, NOW(), $3)
            ON CONFLICT (key) DO UPDATE SET
                value = $2,
                inserted_at = NOW(),
                expires_at = $3
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| githarvest_core::Error::Cache(e.to_string()))?;
        Ok(())
    }
}
