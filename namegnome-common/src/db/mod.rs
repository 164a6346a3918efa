//! Cache store: durable SQLite state behind the planning pipeline
//!
//! Holds provider entities, episode and track lists, persisted
//! disambiguation decisions, TTL-keyed response blobs, and advisory lock
//! rows. The pool is the only shared mutable store in the system; SQLite
//! serialises writes internally.

pub mod blobs;
pub mod decisions;
pub mod entities;
pub mod kv;
pub mod locks;
pub mod migrations;

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (creating if needed) the cache database and apply migrations.
pub async fn init_cache_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to cache database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests and ephemeral runs.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePool::connect("sqlite::memory:").await?;
    migrations::run_migrations(&pool).await?;
    Ok(pool)
}

/// Seconds since the Unix epoch.
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}
