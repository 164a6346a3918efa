//! Persisted disambiguation decisions
//!
//! A decision pins `(scope, title_norm, year)` to a `(provider, ext_id)`
//! pair. `year = -1` encodes "year unknown". Decisions never expire
//! implicitly; once a user has chosen, later plans reuse the choice.

use crate::db::now_epoch;
use crate::Result;
use sqlx::{Row, SqlitePool};

/// Sentinel year for "year unknown" decision keys.
pub const YEAR_UNKNOWN: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub scope: String,
    pub title_norm: String,
    pub year: i32,
    pub provider: String,
    pub ext_id: String,
    pub created_at: i64,
}

/// Look up a pinned decision.
pub async fn get_decision(
    pool: &SqlitePool,
    scope: &str,
    title_norm: &str,
    year: Option<i32>,
) -> Result<Option<Decision>> {
    let year = year.unwrap_or(YEAR_UNKNOWN);
    let row = sqlx::query(
        r#"
        SELECT scope, title_norm, year, provider, ext_id, created_at
        FROM decisions
        WHERE scope = ? AND title_norm = ? AND year = ?
        "#,
    )
    .bind(scope)
    .bind(title_norm)
    .bind(year)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(Decision {
            scope: row.try_get("scope")?,
            title_norm: row.try_get("title_norm")?,
            year: row.try_get("year")?,
            provider: row.try_get("provider")?,
            ext_id: row.try_get("ext_id")?,
            created_at: row.try_get("created_at")?,
        })
    })
    .transpose()
}

/// Persist (or overwrite) a decision.
pub async fn put_decision(
    pool: &SqlitePool,
    scope: &str,
    title_norm: &str,
    year: Option<i32>,
    provider: &str,
    ext_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO decisions (scope, title_norm, year, provider, ext_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (scope, title_norm, year) DO UPDATE SET
            provider = excluded.provider,
            ext_id = excluded.ext_id,
            created_at = excluded.created_at
        "#,
    )
    .bind(scope)
    .bind(title_norm)
    .bind(year.unwrap_or(YEAR_UNKNOWN))
    .bind(provider)
    .bind(ext_id)
    .bind(now_epoch())
    .execute(pool)
    .await?;
    Ok(())
}
