//! TTL-keyed provider response blobs
//!
//! Opaque intermediate payloads (search results, raw detail responses)
//! keyed by a caller-computed cache key. TTL is soft: an expired row is
//! returned with `stale = true` so the caller can refresh in background
//! or, offline, still use it. Corrupt rows are evicted and reported as
//! misses.

use crate::db::now_epoch;
use crate::Result;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

/// A cached blob plus its soft-TTL status.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedBlob {
    pub data: Value,
    pub stale: bool,
}

/// Read a blob. `None` on miss or corruption (corrupt rows are evicted).
pub async fn get_cache_blob(pool: &SqlitePool, cache_key: &str) -> Result<Option<CachedBlob>> {
    let row = sqlx::query(
        "SELECT data, expires_at FROM cache_entries WHERE cache_key = ?",
    )
    .bind(cache_key)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let raw: String = row.try_get("data")?;
    let expires_at: i64 = row.try_get("expires_at")?;

    match serde_json::from_str::<Value>(&raw) {
        Ok(data) => Ok(Some(CachedBlob {
            data,
            stale: now_epoch() >= expires_at,
        })),
        Err(e) => {
            tracing::warn!("Evicting corrupt cache blob {}: {}", cache_key, e);
            sqlx::query("DELETE FROM cache_entries WHERE cache_key = ?")
                .bind(cache_key)
                .execute(pool)
                .await?;
            Ok(None)
        }
    }
}

/// Write a blob with the given TTL.
pub async fn put_cache_blob(
    pool: &SqlitePool,
    cache_key: &str,
    provider: &str,
    data: &Value,
    ttl_seconds: i64,
) -> Result<()> {
    let now = now_epoch();
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO cache_entries (cache_key, provider, data, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(cache_key)
    .bind(provider)
    .bind(data.to_string())
    .bind(now + ttl_seconds)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete expired rows; returns how many were removed.
pub async fn cleanup_expired(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
        .bind(now_epoch())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Drop all cached blobs.
pub async fn clear(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM cache_entries").execute(pool).await?;
    Ok(result.rows_affected())
}

/// Blob counts for the CLI cache inspection command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total: i64,
    pub expired: i64,
}

pub async fn stats(pool: &SqlitePool) -> Result<CacheStats> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
        .fetch_one(pool)
        .await?;
    let expired: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries WHERE expires_at <= ?")
            .bind(now_epoch())
            .fetch_one(pool)
            .await?;
    Ok(CacheStats { total, expired })
}
