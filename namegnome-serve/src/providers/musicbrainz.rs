//! MusicBrainz API client
//!
//! No API key; MusicBrainz requires a descriptive User-Agent and at most
//! one request per second (enforced upstream by the gateway bucket).
//!
//! - Artist search: GET /ws/2/artist?query=...&fmt=json
//! - Release groups: GET /ws/2/release-group?artist={mbid}&type=album&fmt=json
//! - Tracks: GET /ws/2/release-group/{mbid}?inc=releases+recordings&fmt=json

use crate::providers::tvdb::urlencode;
use crate::providers::{
    retry_after_secs, status_to_error, Children, MetadataProvider, ProviderError, SearchCandidate,
};
use async_trait::async_trait;
use namegnome_common::db::entities::{ProviderEntity, TrackRecord};
use namegnome_common::naming::normalize_title;
use namegnome_common::types::MediaType;
use serde::Deserialize;
use std::time::Duration;

const BASE_URL: &str = "https://musicbrainz.org/ws/2";
const USER_AGENT: &str = "NameGnomeServe/0.1.0 (https://github.com/namegnome/namegnome-serve)";

#[derive(Debug, Deserialize)]
struct ArtistSearchResponse {
    #[serde(default)]
    artists: Vec<ArtistEntry>,
}

#[derive(Debug, Deserialize)]
struct ArtistEntry {
    id: String,
    name: String,
    #[serde(rename = "life-span")]
    life_span: Option<LifeSpan>,
}

#[derive(Debug, Deserialize)]
struct LifeSpan {
    begin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseGroupBrowse {
    #[serde(rename = "release-groups", default)]
    release_groups: Vec<ReleaseGroupEntry>,
}

#[derive(Debug, Deserialize)]
struct ReleaseGroupEntry {
    id: String,
    title: String,
    #[serde(rename = "first-release-date")]
    first_release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseGroupDetail {
    #[serde(default)]
    releases: Vec<ReleaseEntry>,
}

#[derive(Debug, Deserialize)]
struct ReleaseEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseDetail {
    #[serde(default)]
    media: Vec<Medium>,
}

#[derive(Debug, Deserialize)]
struct Medium {
    position: Option<i32>,
    #[serde(default)]
    tracks: Vec<TrackEntry>,
}

#[derive(Debug, Deserialize)]
struct TrackEntry {
    position: Option<i32>,
    title: String,
}

fn year_from_date(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

/// MusicBrainz provider for artists, albums, and tracks.
pub struct MusicBrainzProvider {
    client: reqwest::Client,
}

impl MusicBrainzProvider {
    pub fn new() -> namegnome_common::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| namegnome_common::Error::Config(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        context: &str,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        // MusicBrainz signals throttling as 503
        if status == 503 {
            let retry = retry_after_secs(&response);
            return Err(ProviderError::RateLimited {
                retry_after_secs: retry,
            });
        }
        if !(200..300).contains(&status) {
            let retry = retry_after_secs(&response);
            return Err(status_to_error(status, retry, context));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[async_trait]
impl MetadataProvider for MusicBrainzProvider {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    async fn search(
        &self,
        _media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        let url = format!(
            "{}/artist?query={}&fmt=json&limit=10",
            BASE_URL,
            urlencode(query)
        );
        let response: ArtistSearchResponse = self.get_json(&url, "MusicBrainz artist search").await?;

        let candidates = response
            .artists
            .into_iter()
            .map(|artist| SearchCandidate {
                provider: "musicbrainz".into(),
                year: artist
                    .life_span
                    .as_ref()
                    .and_then(|ls| year_from_date(ls.begin.as_deref())),
                ext_id: artist.id,
                title: artist.name,
            })
            .collect::<Vec<_>>();

        // Artist begin dates rarely help narrow album years; year filtering
        // happens at album resolution instead.
        let _ = year;
        Ok(candidates)
    }

    async fn fetch(
        &self,
        _media_type: MediaType,
        ext_id: &str,
    ) -> Result<ProviderEntity, ProviderError> {
        #[derive(Debug, Deserialize)]
        struct ArtistDetail {
            id: String,
            name: String,
        }

        let url = format!("{}/artist/{}?fmt=json", BASE_URL, ext_id);
        let artist: ArtistDetail = self.get_json(&url, "MusicBrainz artist").await?;

        Ok(ProviderEntity {
            provider: "musicbrainz".into(),
            entity_type: "artist".into(),
            ext_id: artist.id,
            title_norm: normalize_title(&artist.name),
            title: artist.name,
            year: None,
            metadata: serde_json::Value::Null,
            fetched_at: 0,
            ttl_seconds: 0,
        })
    }

    /// Children of an artist are its albums (release groups); children of
    /// an album are its tracks, read from the group's first release.
    async fn list_children(
        &self,
        _media_type: MediaType,
        ext_id: &str,
    ) -> Result<Children, ProviderError> {
        // Heuristic: artist MBIDs and release-group MBIDs are both UUIDs,
        // so callers prefix album ids with "rg:".
        if let Some(group_id) = ext_id.strip_prefix("rg:") {
            return self.album_tracks(group_id).await;
        }
        self.artist_albums(ext_id).await
    }
}

impl MusicBrainzProvider {
    async fn artist_albums(&self, artist_id: &str) -> Result<Children, ProviderError> {
        let url = format!(
            "{}/release-group?artist={}&type=album&fmt=json&limit=100",
            BASE_URL, artist_id
        );
        let response: ReleaseGroupBrowse = self.get_json(&url, "MusicBrainz release groups").await?;

        let albums = response
            .release_groups
            .into_iter()
            .map(|group| ProviderEntity {
                provider: "musicbrainz".into(),
                entity_type: "album".into(),
                ext_id: format!("rg:{}", group.id),
                title_norm: normalize_title(&group.title),
                year: year_from_date(group.first_release_date.as_deref()),
                title: group.title,
                metadata: serde_json::Value::Null,
                fetched_at: 0,
                ttl_seconds: 0,
            })
            .collect();

        Ok(Children::Albums(albums))
    }

    async fn album_tracks(&self, group_id: &str) -> Result<Children, ProviderError> {
        let url = format!("{}/release-group/{}?inc=releases&fmt=json", BASE_URL, group_id);
        let detail: ReleaseGroupDetail = self.get_json(&url, "MusicBrainz release group").await?;

        let Some(release) = detail.releases.first() else {
            return Ok(Children::Tracks(Vec::new()));
        };

        let url = format!(
            "{}/release/{}?inc=recordings&fmt=json",
            BASE_URL, release.id
        );
        let release_detail: ReleaseDetail = self.get_json(&url, "MusicBrainz release").await?;

        let mut tracks = Vec::new();
        for medium in release_detail.media {
            let disc = medium.position.unwrap_or(1);
            for track in medium.tracks {
                let Some(position) = track.position else {
                    continue;
                };
                tracks.push(TrackRecord {
                    provider: "musicbrainz".into(),
                    album_id: format!("rg:{}", group_id),
                    disc,
                    track: position,
                    title: track.title,
                });
            }
        }
        tracks.sort_by_key(|t| (t.disc, t.track));
        Ok(Children::Tracks(tracks))
    }
}
