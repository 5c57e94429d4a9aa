//! Persisted `Cache` backed by the `cache` table, using the same raw
//! `sqlx::query` style as `backend::postgres::PostgresBackend`.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{PgPool, Row};

use super::Cache;
use crate::error::{QueueError, QueueResult};

pub struct PostgresCache {
    pool: PgPool,
}

impl PostgresCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Cache for PostgresCache {
    async fn get(&self, key: &str) -> QueueResult<Option<Value>> {
        let row = sqlx::query("SELECT value_json FROM cache WHERE key = $1 AND expires_at > now()")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(
                row.try_get("value_json").map_err(|e| QueueError::Store(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: std::time::Duration) -> QueueResult<()> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(0));
        sqlx::query(
            "INSERT INTO cache (key, value_json, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value_json = EXCLUDED.value_json, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(&value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> QueueResult<()> {
        sqlx::query("DELETE FROM cache WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cleanup(&self) -> QueueResult<usize> {
        let result = sqlx::query("DELETE FROM cache WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
