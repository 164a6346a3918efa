//! Metadata provider clients and the gateway façade
//!
//! Each provider implements [`MetadataProvider`]; the
//! [`gateway::ProviderGateway`] layers retry/backoff, token-bucket rate
//! limiting, read-through caching, search fallback, and offline mode on
//! top. A [`ProviderRegistry`] maps each media type to a primary provider
//! plus ordered fallbacks.

pub mod gateway;
pub mod musicbrainz;
pub mod omdb;
pub mod ratelimit;
pub mod tmdb;
pub mod tvdb;
pub mod tvmaze;

use async_trait::async_trait;
use namegnome_common::db::entities::{EpisodeRecord, ProviderEntity, TrackRecord};
use namegnome_common::types::MediaType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Provider client errors, classified for the gateway's retry policy.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Transient error: HTTP {0}")]
    Transient(u16),

    #[error("Permanent error: HTTP {status}: {message}")]
    Permanent { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Offline cache miss")]
    Offline,
}

impl ProviderError {
    /// Whether the gateway may retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::Transient(_)
                | ProviderError::RateLimited { .. }
        )
    }
}

/// Map an HTTP status to the matching error class.
pub(crate) fn status_to_error(status: u16, retry_after_secs: Option<u64>, context: &str) -> ProviderError {
    match status {
        404 => ProviderError::NotFound(context.to_string()),
        429 => ProviderError::RateLimited { retry_after_secs },
        500..=599 => ProviderError::Transient(status),
        _ => ProviderError::Permanent {
            status,
            message: context.to_string(),
        },
    }
}

/// Seconds from a `Retry-After` header, when present and numeric.
pub(crate) fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// One search hit, normalised across providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub provider: String,
    pub ext_id: String,
    pub title: String,
    pub year: Option<i32>,
}

/// Child listing of an entity: episodes for a series, albums for an
/// artist, tracks for an album.
#[derive(Debug, Clone)]
pub enum Children {
    Episodes(Vec<EpisodeRecord>),
    Albums(Vec<ProviderEntity>),
    Tracks(Vec<TrackRecord>),
}

/// Uniform provider interface: search, detail fetch, child listing.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Stable lowercase provider name ("tvdb", "tmdb", ...)
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError>;

    async fn fetch(
        &self,
        media_type: MediaType,
        ext_id: &str,
    ) -> Result<ProviderEntity, ProviderError>;

    async fn list_children(
        &self,
        media_type: MediaType,
        ext_id: &str,
    ) -> Result<Children, ProviderError>;
}

/// Primary + ordered fallbacks per media type.
pub struct ProviderRegistry {
    chains: HashMap<MediaType, Vec<Arc<dyn MetadataProvider>>>,
}

impl ProviderRegistry {
    /// Build the default registry from environment configuration.
    ///
    /// TVDB and TMDB keys are required; OMDb joins the movie chain only
    /// when its key is present. TVmaze and MusicBrainz need no key.
    pub fn from_env() -> namegnome_common::Result<Self> {
        let tvdb = Arc::new(tvdb::TvdbProvider::from_env()?);
        let tmdb = Arc::new(tmdb::TmdbProvider::from_env()?);
        let musicbrainz = Arc::new(musicbrainz::MusicBrainzProvider::new()?);
        let tvmaze = Arc::new(tvmaze::TvMazeProvider::new()?);

        let mut chains: HashMap<MediaType, Vec<Arc<dyn MetadataProvider>>> = HashMap::new();
        chains.insert(MediaType::Tv, vec![tvdb, tvmaze]);

        let mut movie_chain: Vec<Arc<dyn MetadataProvider>> = vec![tmdb];
        if std::env::var("OMDB_API_KEY").is_ok() {
            movie_chain.push(Arc::new(omdb::OmdbProvider::from_env()?));
        }
        chains.insert(MediaType::Movie, movie_chain);
        chains.insert(MediaType::Music, vec![musicbrainz]);

        Ok(Self { chains })
    }

    /// Registry over explicit chains, used by tests and custom wiring.
    pub fn with_chains(chains: HashMap<MediaType, Vec<Arc<dyn MetadataProvider>>>) -> Self {
        Self { chains }
    }

    /// Primary provider for a media type.
    pub fn primary(&self, media_type: MediaType) -> Option<&Arc<dyn MetadataProvider>> {
        self.chains.get(&media_type).and_then(|c| c.first())
    }

    /// Full chain (primary first) for a media type.
    pub fn chain(&self, media_type: MediaType) -> &[Arc<dyn MetadataProvider>] {
        self.chains
            .get(&media_type)
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    /// Move the named provider to the front of its media type's chain.
    pub fn prefer(&mut self, media_type: MediaType, name: &str) {
        if let Some(chain) = self.chains.get_mut(&media_type) {
            if let Some(position) = chain.iter().position(|p| p.name() == name) {
                let preferred = chain.remove(position);
                chain.insert(0, preferred);
            }
        }
    }

    /// Find a provider by name across all chains.
    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn MetadataProvider>> {
        self.chains
            .values()
            .flat_map(|chain| chain.iter())
            .find(|p| p.name() == name)
    }
}
