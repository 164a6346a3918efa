//! TVmaze API client, TV search fallback
//!
//! No API key required.
//! - Search: GET /search/shows?q=...
//! - Detail: GET /shows/{id}
//! - Episodes: GET /shows/{id}/episodes

use crate::providers::tvdb::urlencode;
use crate::providers::{
    retry_after_secs, status_to_error, Children, MetadataProvider, ProviderError, SearchCandidate,
};
use async_trait::async_trait;
use namegnome_common::db::entities::{EpisodeRecord, ProviderEntity};
use namegnome_common::naming::normalize_title;
use namegnome_common::types::MediaType;
use serde::Deserialize;
use std::time::Duration;

const BASE_URL: &str = "https://api.tvmaze.com";

#[derive(Debug, Deserialize)]
struct SearchHit {
    show: Show,
}

#[derive(Debug, Deserialize)]
struct Show {
    id: i64,
    name: String,
    premiered: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Episode {
    season: Option<i32>,
    number: Option<i32>,
    name: Option<String>,
    airdate: Option<String>,
}

fn year_from_date(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

/// TVmaze fallback provider for TV series.
pub struct TvMazeProvider {
    client: reqwest::Client,
}

impl TvMazeProvider {
    pub fn new() -> namegnome_common::Result<Self> {
        let client = reqwest::Client::builder()
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
impl MetadataProvider for TvMazeProvider {
    fn name(&self) -> &'static str {
        "tvmaze"
    }

    async fn search(
        &self,
        _media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        let url = format!("{}/search/shows?q={}", BASE_URL, urlencode(query));
        let hits: Vec<SearchHit> = self.get_json(&url, "TVmaze search").await?;

        let mut candidates: Vec<SearchCandidate> = hits
            .into_iter()
            .map(|hit| SearchCandidate {
                provider: "tvmaze".into(),
                ext_id: hit.show.id.to_string(),
                year: year_from_date(hit.show.premiered.as_deref()),
                title: hit.show.name,
            })
            .collect();

        if let Some(year) = year {
            let filtered: Vec<_> = candidates
                .iter()
                .filter(|c| c.year == Some(year))
                .cloned()
                .collect();
            if !filtered.is_empty() {
                candidates = filtered;
            }
        }

        Ok(candidates)
    }

    async fn fetch(
        &self,
        _media_type: MediaType,
        ext_id: &str,
    ) -> Result<ProviderEntity, ProviderError> {
        let url = format!("{}/shows/{}", BASE_URL, ext_id);
        let show: Show = self.get_json(&url, "TVmaze show").await?;

        Ok(ProviderEntity {
            provider: "tvmaze".into(),
            entity_type: "series".into(),
            ext_id: show.id.to_string(),
            title_norm: normalize_title(&show.name),
            year: year_from_date(show.premiered.as_deref()),
            title: show.name,
            metadata: serde_json::json!({ "summary": show.summary }),
            fetched_at: 0,
            ttl_seconds: 0,
        })
    }

    async fn list_children(
        &self,
        _media_type: MediaType,
        ext_id: &str,
    ) -> Result<Children, ProviderError> {
        let url = format!("{}/shows/{}/episodes", BASE_URL, ext_id);
        let episodes: Vec<Episode> = self.get_json(&url, "TVmaze episodes").await?;

        let mut records: Vec<EpisodeRecord> = episodes
            .into_iter()
            .filter_map(|episode| {
                let (Some(season), Some(number)) = (episode.season, episode.number) else {
                    return None;
                };
                Some(EpisodeRecord {
                    provider: "tvmaze".into(),
                    series_id: ext_id.to_string(),
                    season,
                    episode: number,
                    title: episode.name.unwrap_or_default(),
                    air_date: episode.airdate,
                })
            })
            .collect();
        records.sort_by_key(|e| (e.season, e.episode));
        Ok(Children::Episodes(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_hits_parse() {
        let raw = r#"[{"show": {"id": 1, "name": "Danger Mouse", "premiered": "2015-09-28"}}]"#;
        let hits: Vec<SearchHit> = serde_json::from_str(raw).unwrap();
        assert_eq!(hits[0].show.name, "Danger Mouse");
        assert_eq!(year_from_date(hits[0].show.premiered.as_deref()), Some(2015));
    }
}
