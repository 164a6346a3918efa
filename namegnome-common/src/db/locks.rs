//! Advisory lock rows for apply serialisation
//!
//! One row per locked root. The database row is the cross-process source
//! of truth; the apply executor pairs it with a filesystem lock file under
//! the root. Orphaned rows (owner dead, `acquired_at` older than the
//! timeout) are stolen during acquisition.

use crate::db::now_epoch;
use crate::{Error, Result};
use sqlx::{Row, SqlitePool};

/// The current holder of a root lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRow {
    pub name: String,
    pub owner: String,
    pub acquired_at: i64,
}

/// Acquire the named lock for `owner`.
///
/// Fails with [`Error::Locked`] when a live holder exists. A holder whose
/// row is older than `stale_after_secs` is treated as orphaned and
/// replaced.
pub async fn acquire_lock(
    pool: &SqlitePool,
    name: &str,
    owner: &str,
    stale_after_secs: i64,
) -> Result<()> {
    let now = now_epoch();

    let mut tx = pool.begin().await?;

    let existing = sqlx::query("SELECT name, owner, acquired_at FROM locks WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

    if let Some(row) = existing {
        let holder: String = row.try_get("owner")?;
        let acquired_at: i64 = row.try_get("acquired_at")?;

        if holder == owner {
            // Re-entrant acquire by the same owner refreshes the row.
        } else if now - acquired_at < stale_after_secs {
            tx.rollback().await?;
            return Err(Error::Locked {
                active_job_id: holder,
                acquired_at,
            });
        } else {
            tracing::warn!(
                "Recovering orphaned lock '{}' held by {} since {}",
                name,
                holder,
                acquired_at
            );
        }
    }

    sqlx::query(
        r#"
        INSERT INTO locks (name, owner, acquired_at) VALUES (?, ?, ?)
        ON CONFLICT (name) DO UPDATE SET owner = excluded.owner, acquired_at = excluded.acquired_at
        "#,
    )
    .bind(name)
    .bind(owner)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Release the lock if `owner` still holds it.
pub async fn release_lock(pool: &SqlitePool, name: &str, owner: &str) -> Result<()> {
    sqlx::query("DELETE FROM locks WHERE name = ? AND owner = ?")
        .bind(name)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(())
}

/// Current holder, if any.
pub async fn is_lock_held(pool: &SqlitePool, name: &str) -> Result<Option<LockRow>> {
    let row = sqlx::query("SELECT name, owner, acquired_at FROM locks WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    row.map(|row| {
        Ok(LockRow {
            name: row.try_get("name")?,
            owner: row.try_get("owner")?,
            acquired_at: row.try_get("acquired_at")?,
        })
    })
    .transpose()
}
