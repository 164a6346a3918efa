//! Shared fixtures for integration tests: scripted providers and state
//! wiring backed by an in-memory cache database.
#![allow(dead_code)]

use async_trait::async_trait;
use namegnome_common::config::{AppConfig, ProviderTunables};
use namegnome_common::db::entities::{EpisodeRecord, ProviderEntity, TrackRecord};
use namegnome_common::db::init_memory_pool;
use namegnome_common::events::EventBus;
use namegnome_common::naming::normalize_title;
use namegnome_common::types::MediaType;
use namegnome_serve::providers::gateway::ProviderGateway;
use namegnome_serve::providers::{
    Children, MetadataProvider, ProviderError, ProviderRegistry, SearchCandidate,
};
use namegnome_serve::AppState;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

/// Provider that answers from fixed data; no network anywhere.
#[derive(Default)]
pub struct StaticProvider {
    pub provider_name: &'static str,
    pub candidates: Vec<SearchCandidate>,
    pub episodes: Vec<EpisodeRecord>,
    pub albums: Vec<ProviderEntity>,
    pub tracks: Vec<TrackRecord>,
}

impl StaticProvider {
    pub fn tv(provider_name: &'static str) -> Self {
        Self {
            provider_name,
            ..Default::default()
        }
    }

    pub fn movie(provider_name: &'static str) -> Self {
        Self {
            provider_name,
            ..Default::default()
        }
    }

    pub fn music(provider_name: &'static str) -> Self {
        Self {
            provider_name,
            ..Default::default()
        }
    }

    pub fn with_series(mut self, ext_id: &str, title: &str, year: i32) -> Self {
        self.candidates.push(SearchCandidate {
            provider: self.provider_name.to_string(),
            ext_id: ext_id.to_string(),
            title: title.to_string(),
            year: Some(year),
        });
        self
    }

    pub fn with_episode(mut self, series_id: &str, season: i32, episode: i32, title: &str) -> Self {
        self.episodes.push(EpisodeRecord {
            provider: self.provider_name.to_string(),
            series_id: series_id.to_string(),
            season,
            episode,
            title: title.to_string(),
            air_date: None,
        });
        self
    }

    pub fn with_movie(self, ext_id: &str, title: &str, year: i32) -> Self {
        // Same candidate shape as a series; the media type is the caller's
        self.with_series(ext_id, title, year)
    }

    pub fn with_artist(mut self, ext_id: &str, name: &str) -> Self {
        self.candidates.push(SearchCandidate {
            provider: self.provider_name.to_string(),
            ext_id: ext_id.to_string(),
            title: name.to_string(),
            year: None,
        });
        self
    }

    pub fn with_album(mut self, ext_id: &str, title: &str, year: i32) -> Self {
        self.albums.push(ProviderEntity {
            provider: self.provider_name.to_string(),
            entity_type: "album".to_string(),
            ext_id: ext_id.to_string(),
            title: title.to_string(),
            title_norm: normalize_title(title),
            year: Some(year),
            metadata: serde_json::Value::Null,
            fetched_at: 0,
            ttl_seconds: 0,
        });
        self
    }

    pub fn with_track(mut self, album_id: &str, disc: i32, track: i32, title: &str) -> Self {
        self.tracks.push(TrackRecord {
            provider: self.provider_name.to_string(),
            album_id: album_id.to_string(),
            disc,
            track,
            title: title.to_string(),
        });
        self
    }
}

#[async_trait]
impl MetadataProvider for StaticProvider {
    fn name(&self) -> &'static str {
        self.provider_name
    }

    async fn search(
        &self,
        _media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        let query_norm = normalize_title(query);
        Ok(self
            .candidates
            .iter()
            .filter(|c| normalize_title(&c.title) == query_norm)
            .filter(|c| year.is_none() || c.year == year)
            .cloned()
            .collect())
    }

    async fn fetch(
        &self,
        media_type: MediaType,
        ext_id: &str,
    ) -> Result<ProviderEntity, ProviderError> {
        let candidate = self
            .candidates
            .iter()
            .find(|c| c.ext_id == ext_id)
            .ok_or_else(|| ProviderError::NotFound(ext_id.to_string()))?;
        Ok(ProviderEntity {
            provider: self.provider_name.to_string(),
            entity_type: match media_type {
                MediaType::Tv => "series",
                MediaType::Movie => "movie",
                MediaType::Music => "artist",
            }
            .to_string(),
            ext_id: candidate.ext_id.clone(),
            title: candidate.title.clone(),
            title_norm: normalize_title(&candidate.title),
            year: candidate.year,
            metadata: serde_json::Value::Null,
            fetched_at: 0,
            ttl_seconds: 0,
        })
    }

    async fn list_children(
        &self,
        media_type: MediaType,
        ext_id: &str,
    ) -> Result<Children, ProviderError> {
        match media_type {
            MediaType::Tv => Ok(Children::Episodes(
                self.episodes
                    .iter()
                    .filter(|e| e.series_id == ext_id)
                    .cloned()
                    .collect(),
            )),
            MediaType::Music => {
                if self.albums.iter().any(|a| a.ext_id == ext_id) || self.tracks.is_empty() {
                    Ok(Children::Tracks(
                        self.tracks
                            .iter()
                            .filter(|t| t.album_id == ext_id)
                            .cloned()
                            .collect(),
                    ))
                } else {
                    Ok(Children::Albums(self.albums.clone()))
                }
            }
            MediaType::Movie => Ok(Children::Episodes(Vec::new())),
        }
    }
}

pub fn fast_tunables() -> ProviderTunables {
    ProviderTunables {
        max_attempts: 2,
        backoff_base_ms: 1,
        bucket_capacity: 1000,
        bucket_refill_per_sec: 10_000.0,
        call_timeout_secs: 5,
    }
}

/// Gateway over a single-provider chain for one media type.
pub async fn gateway_for(
    media_type: MediaType,
    provider: StaticProvider,
) -> (SqlitePool, ProviderGateway) {
    let pool = init_memory_pool().await.unwrap();
    let mut chains: HashMap<MediaType, Vec<Arc<dyn MetadataProvider>>> = HashMap::new();
    chains.insert(media_type, vec![Arc::new(provider)]);
    let registry = ProviderRegistry::with_chains(chains);
    let gateway = ProviderGateway::new(pool.clone(), registry, fast_tunables(), false);
    (pool, gateway)
}

/// Gateway over one TV provider chain.
pub async fn tv_gateway(provider: StaticProvider) -> (SqlitePool, ProviderGateway) {
    gateway_for(MediaType::Tv, provider).await
}

/// Full app state over an arbitrary provider chain map.
pub async fn app_state(chains: HashMap<MediaType, Vec<Arc<dyn MetadataProvider>>>) -> AppState {
    let pool = init_memory_pool().await.unwrap();
    let registry = ProviderRegistry::with_chains(chains);
    let gateway = Arc::new(ProviderGateway::new(
        pool.clone(),
        registry,
        fast_tunables(),
        false,
    ));
    let config = AppConfig::resolve(None, false).unwrap();
    AppState::new(pool, EventBus::new(64), gateway, config)
}
