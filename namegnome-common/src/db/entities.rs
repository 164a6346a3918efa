//! Provider entity, episode, and track persistence

use crate::db::now_epoch;
use crate::Result;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

/// A cached provider entity (series, movie, artist, or album).
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEntity {
    pub provider: String,
    pub entity_type: String,
    pub ext_id: String,
    pub title: String,
    pub title_norm: String,
    pub year: Option<i32>,
    pub metadata: Value,
    pub fetched_at: i64,
    pub ttl_seconds: i64,
}

impl ProviderEntity {
    /// Soft TTL check against the given instant.
    pub fn is_stale(&self, now: i64) -> bool {
        now >= self.fetched_at + self.ttl_seconds
    }
}

/// A canonical episode row for `(provider, series_id, season, episode)`.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeRecord {
    pub provider: String,
    pub series_id: String,
    pub season: i32,
    pub episode: i32,
    pub title: String,
    pub air_date: Option<String>,
}

/// A canonical track row for `(provider, album_id, disc, track)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub provider: String,
    pub album_id: String,
    pub disc: i32,
    pub track: i32,
    pub title: String,
}

/// Fetch one entity. Returns the row even when stale; the caller checks
/// [`ProviderEntity::is_stale`] and refreshes in background if needed.
pub async fn get_entity(
    pool: &SqlitePool,
    provider: &str,
    entity_type: &str,
    ext_id: &str,
) -> Result<Option<ProviderEntity>> {
    let row = sqlx::query(
        r#"
        SELECT provider, entity_type, ext_id, title, title_norm, year,
               metadata, fetched_at, ttl_seconds
        FROM entities
        WHERE provider = ? AND entity_type = ? AND ext_id = ?
        "#,
    )
    .bind(provider)
    .bind(entity_type)
    .bind(ext_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| entity_from_row(&row)).transpose()
}

fn entity_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ProviderEntity> {
    let metadata_raw: String = row.try_get("metadata")?;
    let metadata = serde_json::from_str(&metadata_raw).unwrap_or(Value::Null);
    Ok(ProviderEntity {
        provider: row.try_get("provider")?,
        entity_type: row.try_get("entity_type")?,
        ext_id: row.try_get("ext_id")?,
        title: row.try_get("title")?,
        title_norm: row.try_get("title_norm")?,
        year: row.try_get("year")?,
        metadata,
        fetched_at: row.try_get("fetched_at")?,
        ttl_seconds: row.try_get("ttl_seconds")?,
    })
}

/// Insert or refresh an entity row.
pub async fn put_entity(pool: &SqlitePool, entity: &ProviderEntity) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO entities
            (provider, entity_type, ext_id, title, title_norm, year, metadata, fetched_at, ttl_seconds)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (provider, entity_type, ext_id) DO UPDATE SET
            title = excluded.title,
            title_norm = excluded.title_norm,
            year = excluded.year,
            metadata = excluded.metadata,
            fetched_at = excluded.fetched_at,
            ttl_seconds = excluded.ttl_seconds
        "#,
    )
    .bind(&entity.provider)
    .bind(&entity.entity_type)
    .bind(&entity.ext_id)
    .bind(&entity.title)
    .bind(&entity.title_norm)
    .bind(entity.year)
    .bind(entity.metadata.to_string())
    .bind(entity.fetched_at)
    .bind(entity.ttl_seconds)
    .execute(pool)
    .await?;
    Ok(())
}

/// Episode list for a series, optionally restricted to one season.
/// Ordered `(season, episode)`.
pub async fn get_episodes(
    pool: &SqlitePool,
    provider: &str,
    series_id: &str,
    season: Option<i32>,
) -> Result<Vec<EpisodeRecord>> {
    let rows = match season {
        Some(season) => {
            sqlx::query(
                r#"
                SELECT provider, series_id, season, episode, title, air_date
                FROM episodes
                WHERE provider = ? AND series_id = ? AND season = ?
                ORDER BY season, episode
                "#,
            )
            .bind(provider)
            .bind(series_id)
            .bind(season)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT provider, series_id, season, episode, title, air_date
                FROM episodes
                WHERE provider = ? AND series_id = ?
                ORDER BY season, episode
                "#,
            )
            .bind(provider)
            .bind(series_id)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter()
        .map(|row| {
            Ok(EpisodeRecord {
                provider: row.try_get("provider")?,
                series_id: row.try_get("series_id")?,
                season: row.try_get("season")?,
                episode: row.try_get("episode")?,
                title: row.try_get("title")?,
                air_date: row.try_get("air_date")?,
            })
        })
        .collect()
}

/// Replace the cached episode list for a series in one transaction.
pub async fn put_episodes(
    pool: &SqlitePool,
    provider: &str,
    series_id: &str,
    episodes: &[EpisodeRecord],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM episodes WHERE provider = ? AND series_id = ?")
        .bind(provider)
        .bind(series_id)
        .execute(&mut *tx)
        .await?;

    let fetched_at = now_epoch();
    for episode in episodes {
        sqlx::query(
            r#"
            INSERT INTO episodes
                (provider, series_id, season, episode, title, air_date, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(provider)
        .bind(series_id)
        .bind(episode.season)
        .bind(episode.episode)
        .bind(&episode.title)
        .bind(&episode.air_date)
        .bind(fetched_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Track list for an album, ordered `(disc, track)`.
pub async fn get_tracks(
    pool: &SqlitePool,
    provider: &str,
    album_id: &str,
) -> Result<Vec<TrackRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT provider, album_id, disc, track, title
        FROM tracks
        WHERE provider = ? AND album_id = ?
        ORDER BY disc, track
        "#,
    )
    .bind(provider)
    .bind(album_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(TrackRecord {
                provider: row.try_get("provider")?,
                album_id: row.try_get("album_id")?,
                disc: row.try_get("disc")?,
                track: row.try_get("track")?,
                title: row.try_get("title")?,
            })
        })
        .collect()
}

/// Replace the cached track list for an album in one transaction.
pub async fn put_tracks(
    pool: &SqlitePool,
    provider: &str,
    album_id: &str,
    tracks: &[TrackRecord],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM tracks WHERE provider = ? AND album_id = ?")
        .bind(provider)
        .bind(album_id)
        .execute(&mut *tx)
        .await?;

    let fetched_at = now_epoch();
    for track in tracks {
        sqlx::query(
            r#"
            INSERT INTO tracks (provider, album_id, disc, track, title, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(provider)
        .bind(album_id)
        .bind(track.disc)
        .bind(track.track)
        .bind(&track.title)
        .bind(fetched_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    fn sample_entity() -> ProviderEntity {
        ProviderEntity {
            provider: "tvdb".into(),
            entity_type: "series".into(),
            ext_id: "78312".into(),
            title: "Danger Mouse".into(),
            title_norm: "danger mouse".into(),
            year: Some(2015),
            metadata: serde_json::json!({"status": "Ended"}),
            fetched_at: 1_000,
            ttl_seconds: 3_600,
        }
    }

    #[tokio::test]
    async fn entity_round_trip_and_upsert() {
        let pool = init_memory_pool().await.unwrap();
        let mut entity = sample_entity();

        put_entity(&pool, &entity).await.unwrap();
        let loaded = get_entity(&pool, "tvdb", "series", "78312")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, entity);

        entity.title = "Danger Mouse (2015)".into();
        entity.fetched_at = 2_000;
        put_entity(&pool, &entity).await.unwrap();
        let reloaded = get_entity(&pool, "tvdb", "series", "78312")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.fetched_at, 2_000);
        assert_eq!(reloaded.title, "Danger Mouse (2015)");
    }

    #[tokio::test]
    async fn entity_staleness_uses_soft_ttl() {
        let entity = sample_entity();
        assert!(!entity.is_stale(1_000 + 3_599));
        assert!(entity.is_stale(1_000 + 3_600));
    }

    #[tokio::test]
    async fn episodes_replace_and_filter_by_season() {
        let pool = init_memory_pool().await.unwrap();
        let eps = vec![
            EpisodeRecord {
                provider: "tvdb".into(),
                series_id: "1".into(),
                season: 1,
                episode: 1,
                title: "Pilot".into(),
                air_date: Some("2015-09-28".into()),
            },
            EpisodeRecord {
                provider: "tvdb".into(),
                series_id: "1".into(),
                season: 2,
                episode: 1,
                title: "Return".into(),
                air_date: None,
            },
        ];
        put_episodes(&pool, "tvdb", "1", &eps).await.unwrap();

        let season_one = get_episodes(&pool, "tvdb", "1", Some(1)).await.unwrap();
        assert_eq!(season_one.len(), 1);
        assert_eq!(season_one[0].title, "Pilot");

        let all = get_episodes(&pool, "tvdb", "1", None).await.unwrap();
        assert_eq!(all.len(), 2);

        // put replaces, never appends
        put_episodes(&pool, "tvdb", "1", &eps[..1]).await.unwrap();
        let all = get_episodes(&pool, "tvdb", "1", None).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn tracks_ordered_by_disc_then_track() {
        let pool = init_memory_pool().await.unwrap();
        let tracks = vec![
            TrackRecord {
                provider: "musicbrainz".into(),
                album_id: "a".into(),
                disc: 2,
                track: 1,
                title: "D2T1".into(),
            },
            TrackRecord {
                provider: "musicbrainz".into(),
                album_id: "a".into(),
                disc: 1,
                track: 2,
                title: "D1T2".into(),
            },
        ];
        put_tracks(&pool, "musicbrainz", "a", &tracks).await.unwrap();

        let loaded = get_tracks(&pool, "musicbrainz", "a").await.unwrap();
        assert_eq!(loaded[0].title, "D1T2");
        assert_eq!(loaded[1].title, "D2T1");
    }
}
