//! Small durable key/value store
//!
//! Used for pending disambiguation tokens and other bits of pipeline state
//! that need to survive a restart but do not warrant a dedicated table.

use crate::db::now_epoch;
use crate::Result;
use serde_json::Value;
use sqlx::SqlitePool;

/// Read a JSON value by key.
pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
}

/// Write a JSON value.
pub async fn put(pool: &SqlitePool, key: &str, value: &Value) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, ?)",
    )
    .bind(key)
    .bind(value.to_string())
    .bind(now_epoch())
    .execute(pool)
    .await?;
    Ok(())
}

/// Remove a key.
pub async fn delete(pool: &SqlitePool, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM kv WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn kv_round_trip() {
        let pool = init_memory_pool().await.unwrap();
        let value = serde_json::json!({"field": "title", "candidates": 2});
        put(&pool, "dsk_abc", &value).await.unwrap();
        assert_eq!(get(&pool, "dsk_abc").await.unwrap(), Some(value));

        delete(&pool, "dsk_abc").await.unwrap();
        assert_eq!(get(&pool, "dsk_abc").await.unwrap(), None);
    }
}
