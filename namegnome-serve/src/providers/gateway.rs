//! Provider gateway: retry, rate limiting, caching, fallback, offline
//!
//! Uniform façade over the registered providers. Every outbound call:
//! 1. takes a token from the provider's bucket,
//! 2. runs under the per-call timeout,
//! 3. retries transient failures with jittered exponential backoff,
//! 4. honours `Retry-After` on 429.
//!
//! Searches fall back across the registry chain after the primary
//! exhausts its retries or returns poor data; detail fetches never fall
//! back (an `ext_id` is provider-specific). All reads go through the
//! cache store first; offline mode serves exclusively from it.

use crate::providers::ratelimit::TokenBucket;
use crate::providers::{Children, MetadataProvider, ProviderError, ProviderRegistry, SearchCandidate};
use namegnome_common::config::ProviderTunables;
use namegnome_common::db::entities::{self, EpisodeRecord, ProviderEntity, TrackRecord};
use namegnome_common::db::{blobs, now_epoch};
use namegnome_common::naming::normalize_title;
use namegnome_common::types::MediaType;
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Cache TTLs per payload class, in seconds.
pub const TTL_SERIES: i64 = 30 * 24 * 3600;
pub const TTL_EPISODES: i64 = 7 * 24 * 3600;
pub const TTL_MOVIE: i64 = 30 * 24 * 3600;
pub const TTL_ALBUM: i64 = 30 * 24 * 3600;

/// Gateway over the provider registry.
pub struct ProviderGateway {
    pool: SqlitePool,
    registry: ProviderRegistry,
    buckets: HashMap<&'static str, TokenBucket>,
    tunables: ProviderTunables,
    offline: bool,
}

impl ProviderGateway {
    pub fn new(
        pool: SqlitePool,
        registry: ProviderRegistry,
        tunables: ProviderTunables,
        offline: bool,
    ) -> Self {
        let mut buckets = HashMap::new();
        for media_type in [MediaType::Tv, MediaType::Movie, MediaType::Music] {
            for provider in registry.chain(media_type) {
                buckets.entry(provider.name()).or_insert_with(|| {
                    TokenBucket::new(tunables.bucket_capacity, tunables.bucket_refill_per_sec)
                });
            }
        }
        Self {
            pool,
            registry,
            buckets,
            tunables,
            offline,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    fn entity_ttl(media_type: MediaType) -> i64 {
        match media_type {
            MediaType::Tv => TTL_SERIES,
            MediaType::Movie => TTL_MOVIE,
            MediaType::Music => TTL_ALBUM,
        }
    }

    fn cache_key(parts: &[&str]) -> String {
        let joined = parts.join(":");
        format!("{:x}", Sha256::digest(joined.as_bytes()))
    }

    /// Run one provider operation with bucket, timeout, and retry policy.
    async fn call_with_retry<T, F, Fut>(
        &self,
        provider: &str,
        operation: &str,
        call: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let timeout = Duration::from_secs(self.tunables.call_timeout_secs);
        let mut last_error = ProviderError::Network("no attempts made".into());

        for attempt in 0..self.tunables.max_attempts {
            if let Some(bucket) = self.buckets.get(provider) {
                bucket.acquire().await;
            }

            let result = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Network(format!(
                    "{} {} timed out after {:?}",
                    provider, operation, timeout
                ))),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.tunables.max_attempts => {
                    let delay = self.backoff_delay(attempt, &e);
                    tracing::debug!(
                        "{} {} attempt {} failed ({}), retrying in {:?}",
                        provider,
                        operation,
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    /// `base * 2^k` with ±25% jitter; 429 honours `Retry-After`.
    fn backoff_delay(&self, attempt: u32, error: &ProviderError) -> Duration {
        if let ProviderError::RateLimited {
            retry_after_secs: Some(secs),
        } = error
        {
            return Duration::from_secs(*secs);
        }
        let base = self.tunables.backoff_base_ms as f64 * 2f64.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.75..1.25);
        Duration::from_millis((base * jitter) as u64)
    }

    /// Search for an entity, reading through the cache and falling back
    /// across the provider chain when the primary fails or returns poor
    /// data.
    pub async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        let chain = self.registry.chain(media_type);
        if chain.is_empty() {
            return Err(ProviderError::Permanent {
                status: 0,
                message: format!("no providers registered for {}", media_type),
            });
        }

        let query_norm = normalize_title(query);
        let year_key = year.map(|y| y.to_string()).unwrap_or_else(|| "-".into());
        let mut last_error: Option<ProviderError> = None;

        for (index, provider) in chain.iter().enumerate() {
            let key = Self::cache_key(&[
                "search",
                provider.name(),
                media_type.as_str(),
                &query_norm,
                &year_key,
            ]);

            if let Some(blob) = blobs::get_cache_blob(&self.pool, &key)
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?
            {
                if !blob.stale || self.offline {
                    if let Ok(candidates) =
                        serde_json::from_value::<Vec<SearchCandidate>>(blob.data)
                    {
                        if !candidates.is_empty() || index + 1 == chain.len() {
                            return Ok(candidates);
                        }
                        continue;
                    }
                }
            }

            if self.offline {
                last_error = Some(ProviderError::Offline);
                continue;
            }

            let result = self
                .call_with_retry(provider.name(), "search", || {
                    provider.search(media_type, query, year)
                })
                .await;

            match result {
                Ok(candidates) => {
                    let blob = serde_json::to_value(&candidates)
                        .map_err(|e| ProviderError::Parse(e.to_string()))?;
                    blobs::put_cache_blob(
                        &self.pool,
                        &key,
                        provider.name(),
                        &blob,
                        Self::entity_ttl(media_type),
                    )
                    .await
                    .map_err(|e| ProviderError::Network(e.to_string()))?;

                    // Poor data: an empty result set falls through to the
                    // next provider in the chain.
                    if candidates.is_empty() && index + 1 < chain.len() {
                        tracing::debug!(
                            "{} returned no candidates for '{}', trying fallback",
                            provider.name(),
                            query_norm
                        );
                        continue;
                    }
                    return Ok(candidates);
                }
                Err(e) => {
                    tracing::warn!("{} search failed: {}", provider.name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::Offline))
    }

    /// Fetch entity detail by provider id. Never falls back: the id is
    /// meaningless to any other provider.
    pub async fn fetch_entity(
        &self,
        provider_name: &str,
        media_type: MediaType,
        ext_id: &str,
    ) -> Result<ProviderEntity, ProviderError> {
        let entity_type = match media_type {
            MediaType::Tv => "series",
            MediaType::Movie => "movie",
            MediaType::Music => "artist",
        };

        if let Some(cached) =
            entities::get_entity(&self.pool, provider_name, entity_type, ext_id)
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?
        {
            if !cached.is_stale(now_epoch()) || self.offline {
                return Ok(cached);
            }
        }

        if self.offline {
            return Err(ProviderError::Offline);
        }

        let provider = self
            .registry
            .by_name(provider_name)
            .ok_or_else(|| ProviderError::Permanent {
                status: 0,
                message: format!("unknown provider {}", provider_name),
            })?
            .clone();

        let mut entity = self
            .call_with_retry(provider.name(), "fetch", || {
                provider.fetch(media_type, ext_id)
            })
            .await?;

        entity.fetched_at = now_epoch();
        entity.ttl_seconds = Self::entity_ttl(media_type);
        entities::put_entity(&self.pool, &entity)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(entity)
    }

    /// Episode list for a series, cache read-through.
    pub async fn episodes(
        &self,
        provider_name: &str,
        series_id: &str,
        season: Option<i32>,
    ) -> Result<Vec<EpisodeRecord>, ProviderError> {
        let marker_key = Self::cache_key(&["episodes", provider_name, series_id]);
        let marker = blobs::get_cache_blob(&self.pool, &marker_key)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let fresh = marker.as_ref().map(|m| !m.stale).unwrap_or(false);
        if fresh || (self.offline && marker.is_some()) {
            return entities::get_episodes(&self.pool, provider_name, series_id, season)
                .await
                .map_err(|e| ProviderError::Network(e.to_string()));
        }

        if self.offline {
            return Err(ProviderError::Offline);
        }

        let provider = self
            .registry
            .by_name(provider_name)
            .ok_or_else(|| ProviderError::Permanent {
                status: 0,
                message: format!("unknown provider {}", provider_name),
            })?
            .clone();

        let children = self
            .call_with_retry(provider.name(), "episodes", || {
                provider.list_children(MediaType::Tv, series_id)
            })
            .await?;

        let Children::Episodes(episodes) = children else {
            return Err(ProviderError::Parse("expected episode listing".into()));
        };

        entities::put_episodes(&self.pool, provider_name, series_id, &episodes)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        blobs::put_cache_blob(
            &self.pool,
            &marker_key,
            provider_name,
            &serde_json::json!({ "count": episodes.len() }),
            TTL_EPISODES,
        )
        .await
        .map_err(|e| ProviderError::Network(e.to_string()))?;

        entities::get_episodes(&self.pool, provider_name, series_id, season)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))
    }

    /// Album list for an artist, cache read-through.
    pub async fn albums(
        &self,
        provider_name: &str,
        artist_id: &str,
    ) -> Result<Vec<ProviderEntity>, ProviderError> {
        let key = Self::cache_key(&["albums", provider_name, artist_id]);

        if let Some(blob) = blobs::get_cache_blob(&self.pool, &key)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?
        {
            if !blob.stale || self.offline {
                if let Ok(albums) = serde_json::from_value::<Vec<AlbumBlob>>(blob.data) {
                    return Ok(albums.into_iter().map(AlbumBlob::into_entity).collect());
                }
            }
        }

        if self.offline {
            return Err(ProviderError::Offline);
        }

        let provider = self
            .registry
            .by_name(provider_name)
            .ok_or_else(|| ProviderError::Permanent {
                status: 0,
                message: format!("unknown provider {}", provider_name),
            })?
            .clone();

        let children = self
            .call_with_retry(provider.name(), "albums", || {
                provider.list_children(MediaType::Music, artist_id)
            })
            .await?;

        let Children::Albums(albums) = children else {
            return Err(ProviderError::Parse("expected album listing".into()));
        };

        let blob: Vec<AlbumBlob> = albums.iter().map(AlbumBlob::from_entity).collect();
        blobs::put_cache_blob(
            &self.pool,
            &key,
            provider_name,
            &serde_json::to_value(&blob).map_err(|e| ProviderError::Parse(e.to_string()))?,
            TTL_ALBUM,
        )
        .await
        .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(albums)
    }

    /// Track list for an album, cache read-through.
    pub async fn tracks(
        &self,
        provider_name: &str,
        album_id: &str,
    ) -> Result<Vec<TrackRecord>, ProviderError> {
        let marker_key = Self::cache_key(&["tracks", provider_name, album_id]);
        let marker = blobs::get_cache_blob(&self.pool, &marker_key)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let fresh = marker.as_ref().map(|m| !m.stale).unwrap_or(false);
        if fresh || (self.offline && marker.is_some()) {
            return entities::get_tracks(&self.pool, provider_name, album_id)
                .await
                .map_err(|e| ProviderError::Network(e.to_string()));
        }

        if self.offline {
            return Err(ProviderError::Offline);
        }

        let provider = self
            .registry
            .by_name(provider_name)
            .ok_or_else(|| ProviderError::Permanent {
                status: 0,
                message: format!("unknown provider {}", provider_name),
            })?
            .clone();

        let children = self
            .call_with_retry(provider.name(), "tracks", || {
                provider.list_children(MediaType::Music, album_id)
            })
            .await?;

        let Children::Tracks(tracks) = children else {
            return Err(ProviderError::Parse("expected track listing".into()));
        };

        entities::put_tracks(&self.pool, provider_name, album_id, &tracks)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        blobs::put_cache_blob(
            &self.pool,
            &marker_key,
            provider_name,
            &serde_json::json!({ "count": tracks.len() }),
            TTL_ALBUM,
        )
        .await
        .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(tracks)
    }
}

/// Serialisable album projection for the blob cache.
#[derive(serde::Serialize, serde::Deserialize)]
struct AlbumBlob {
    provider: String,
    ext_id: String,
    title: String,
    title_norm: String,
    year: Option<i32>,
}

impl AlbumBlob {
    fn from_entity(entity: &ProviderEntity) -> Self {
        Self {
            provider: entity.provider.clone(),
            ext_id: entity.ext_id.clone(),
            title: entity.title.clone(),
            title_norm: entity.title_norm.clone(),
            year: entity.year,
        }
    }

    fn into_entity(self) -> ProviderEntity {
        ProviderEntity {
            provider: self.provider,
            entity_type: "album".into(),
            ext_id: self.ext_id,
            title: self.title,
            title_norm: self.title_norm,
            year: self.year,
            metadata: serde_json::Value::Null,
            fetched_at: 0,
            ttl_seconds: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MetadataProvider;
    use async_trait::async_trait;
    use namegnome_common::db::init_memory_pool;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Scripted provider: fails `failures` times, then succeeds.
    struct MockProvider {
        name: &'static str,
        failures: AtomicU32,
        calls: AtomicU32,
        candidates: Vec<SearchCandidate>,
    }

    impl MockProvider {
        fn new(name: &'static str, failures: u32, candidates: Vec<SearchCandidate>) -> Self {
            Self {
                name,
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                candidates,
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetadataProvider for MockProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn search(
            &self,
            _media_type: MediaType,
            _query: &str,
            _year: Option<i32>,
        ) -> Result<Vec<SearchCandidate>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::Transient(503));
            }
            Ok(self.candidates.clone())
        }

        async fn fetch(
            &self,
            _media_type: MediaType,
            ext_id: &str,
        ) -> Result<ProviderEntity, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderEntity {
                provider: self.name.into(),
                entity_type: "series".into(),
                ext_id: ext_id.into(),
                title: "Mock".into(),
                title_norm: "mock".into(),
                year: Some(2015),
                metadata: serde_json::Value::Null,
                fetched_at: 0,
                ttl_seconds: 0,
            })
        }

        async fn list_children(
            &self,
            _media_type: MediaType,
            ext_id: &str,
        ) -> Result<Children, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Children::Episodes(vec![EpisodeRecord {
                provider: self.name.into(),
                series_id: ext_id.into(),
                season: 1,
                episode: 1,
                title: "Pilot".into(),
                air_date: None,
            }]))
        }
    }

    fn fast_tunables() -> ProviderTunables {
        ProviderTunables {
            max_attempts: 3,
            backoff_base_ms: 1,
            bucket_capacity: 100,
            bucket_refill_per_sec: 1000.0,
            call_timeout_secs: 5,
        }
    }

    fn candidate(provider: &str, id: &str, title: &str) -> SearchCandidate {
        SearchCandidate {
            provider: provider.into(),
            ext_id: id.into(),
            title: title.into(),
            year: Some(2015),
        }
    }

    fn registry_of(chain: Vec<Arc<dyn MetadataProvider>>) -> ProviderRegistry {
        let mut chains: HashMap<MediaType, Vec<Arc<dyn MetadataProvider>>> = HashMap::new();
        chains.insert(MediaType::Tv, chain);
        ProviderRegistry::with_chains(chains)
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let pool = init_memory_pool().await.unwrap();
        let provider = Arc::new(MockProvider::new(
            "tvdb",
            2,
            vec![candidate("tvdb", "1", "Danger Mouse")],
        ));
        let gateway = ProviderGateway::new(
            pool,
            registry_of(vec![provider.clone()]),
            fast_tunables(),
            false,
        );

        let results = gateway
            .search(MediaType::Tv, "Danger Mouse", None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn falls_back_to_secondary_after_exhausting_primary() {
        let pool = init_memory_pool().await.unwrap();
        let primary = Arc::new(MockProvider::new("tvdb", 99, vec![]));
        let fallback = Arc::new(MockProvider::new(
            "tvmaze",
            0,
            vec![candidate("tvmaze", "9", "Danger Mouse")],
        ));
        let gateway = ProviderGateway::new(
            pool,
            registry_of(vec![primary.clone(), fallback.clone()]),
            fast_tunables(),
            false,
        );

        let results = gateway
            .search(MediaType::Tv, "Danger Mouse", None)
            .await
            .unwrap();
        assert_eq!(results[0].provider, "tvmaze");
        assert_eq!(primary.call_count(), 3); // max_attempts
        assert_eq!(fallback.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_primary_results_trigger_fallback() {
        let pool = init_memory_pool().await.unwrap();
        let primary = Arc::new(MockProvider::new("tvdb", 0, vec![]));
        let fallback = Arc::new(MockProvider::new(
            "tvmaze",
            0,
            vec![candidate("tvmaze", "9", "Rare Show")],
        ));
        let gateway = ProviderGateway::new(
            pool,
            registry_of(vec![primary.clone(), fallback.clone()]),
            fast_tunables(),
            false,
        );

        let results = gateway.search(MediaType::Tv, "Rare Show", None).await.unwrap();
        assert_eq!(results[0].provider, "tvmaze");
    }

    #[tokio::test]
    async fn second_search_is_served_from_cache() {
        let pool = init_memory_pool().await.unwrap();
        let provider = Arc::new(MockProvider::new(
            "tvdb",
            0,
            vec![candidate("tvdb", "1", "Danger Mouse")],
        ));
        let gateway = ProviderGateway::new(
            pool,
            registry_of(vec![provider.clone()]),
            fast_tunables(),
            false,
        );

        gateway.search(MediaType::Tv, "Danger Mouse", None).await.unwrap();
        gateway.search(MediaType::Tv, "Danger Mouse", None).await.unwrap();
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn offline_miss_is_reported_as_offline() {
        let pool = init_memory_pool().await.unwrap();
        let provider = Arc::new(MockProvider::new(
            "tvdb",
            0,
            vec![candidate("tvdb", "1", "Danger Mouse")],
        ));
        let gateway = ProviderGateway::new(
            pool,
            registry_of(vec![provider.clone()]),
            fast_tunables(),
            true,
        );

        let err = gateway
            .search(MediaType::Tv, "Danger Mouse", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Offline));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn episodes_cached_after_first_listing() {
        let pool = init_memory_pool().await.unwrap();
        let provider = Arc::new(MockProvider::new("tvdb", 0, vec![]));
        let gateway = ProviderGateway::new(
            pool,
            registry_of(vec![provider.clone()]),
            fast_tunables(),
            false,
        );

        let first = gateway.episodes("tvdb", "42", Some(1)).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = gateway.episodes("tvdb", "42", Some(1)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let pool = init_memory_pool().await.unwrap();

        struct PermanentFail {
            calls: AtomicU32,
        }

        #[async_trait]
        impl MetadataProvider for PermanentFail {
            fn name(&self) -> &'static str {
                "tvdb"
            }
            async fn search(
                &self,
                _media_type: MediaType,
                _query: &str,
                _year: Option<i32>,
            ) -> Result<Vec<SearchCandidate>, ProviderError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Permanent {
                    status: 401,
                    message: "bad key".into(),
                })
            }
            async fn fetch(
                &self,
                _media_type: MediaType,
                _ext_id: &str,
            ) -> Result<ProviderEntity, ProviderError> {
                unimplemented!()
            }
            async fn list_children(
                &self,
                _media_type: MediaType,
                _ext_id: &str,
            ) -> Result<Children, ProviderError> {
                unimplemented!()
            }
        }

        let provider = Arc::new(PermanentFail {
            calls: AtomicU32::new(0),
        });
        let gateway = ProviderGateway::new(
            pool,
            registry_of(vec![provider.clone()]),
            fast_tunables(),
            false,
        );

        let err = gateway.search(MediaType::Tv, "x", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Permanent { status: 401, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
