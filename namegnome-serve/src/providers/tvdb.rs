//! TVDB API client with JWT authentication
//!
//! TVDB specifics:
//! - Auth: POST /login with `{"apikey": "KEY"}` yields a JWT token
//! - Token cached in memory for 24 h, refreshed on 401
//! - Search: GET /search/series?name=...
//! - Episodes: GET /series/{id}/episodes (paginated)
//!
//! The API key comes from `TVDB_API_KEY` only and never appears in logs.

use crate::providers::{
    retry_after_secs, status_to_error, Children, MetadataProvider, ProviderError, SearchCandidate,
};
use async_trait::async_trait;
use namegnome_common::config::AppConfig;
use namegnome_common::db::entities::{EpisodeRecord, ProviderEntity};
use namegnome_common::naming::normalize_title;
use namegnome_common::types::MediaType;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const BASE_URL: &str = "https://api.thetvdb.com";
const TOKEN_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SeriesSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesSummary {
    id: i64,
    series_name: Option<String>,
    first_aired: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesResponse {
    data: SeriesDetail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesDetail {
    id: i64,
    series_name: Option<String>,
    first_aired: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodesResponse {
    #[serde(default)]
    data: Vec<EpisodeEntry>,
    links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeEntry {
    aired_season: Option<i32>,
    aired_episode_number: Option<i32>,
    episode_name: Option<String>,
    first_aired: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
    next: Option<i64>,
}

fn year_from_date(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

/// TVDB provider for TV series.
pub struct TvdbProvider {
    client: reqwest::Client,
    api_key: String,
    auth_token: RwLock<Option<(String, Instant)>>,
}

impl TvdbProvider {
    pub fn from_env() -> namegnome_common::Result<Self> {
        let api_key = AppConfig::require_api_key("TVDB_API_KEY")?;
        Self::new(api_key)
    }

    pub fn new(api_key: String) -> namegnome_common::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| namegnome_common::Error::Config(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            auth_token: RwLock::new(None),
        })
    }

    async fn auth_token(&self) -> Result<String, ProviderError> {
        {
            let cached = self.auth_token.read().await;
            if let Some((token, acquired)) = cached.as_ref() {
                if acquired.elapsed() < TOKEN_TTL {
                    return Ok(token.clone());
                }
            }
        }
        self.login().await
    }

    async fn login(&self) -> Result<String, ProviderError> {
        tracing::debug!("Authenticating with TVDB");
        let response = self
            .client
            .post(format!("{}/login", BASE_URL))
            .json(&serde_json::json!({ "apikey": self.api_key }))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(ProviderError::Auth("TVDB rejected the API key".into()));
        }
        if !(200..300).contains(&status) {
            let retry = retry_after_secs(&response);
            return Err(status_to_error(status, retry, "TVDB login"));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let mut cached = self.auth_token.write().await;
        *cached = Some((login.token.clone(), Instant::now()));
        Ok(login.token)
    }

    /// GET with bearer auth; re-authenticates once on 401.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        context: &str,
    ) -> Result<T, ProviderError> {
        for reauth in [false, true] {
            let token = if reauth {
                self.login().await?
            } else {
                self.auth_token().await?
            };

            let response = self
                .client
                .get(url)
                .bearer_auth(&token)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;

            let status = response.status().as_u16();
            if status == 401 && !reauth {
                tracing::debug!("TVDB token expired, re-authenticating");
                continue;
            }
            if !(200..300).contains(&status) {
                let retry = retry_after_secs(&response);
                return Err(status_to_error(status, retry, context));
            }

            return response
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()));
        }
        unreachable!("reauth loop always returns")
    }
}

#[async_trait]
impl MetadataProvider for TvdbProvider {
    fn name(&self) -> &'static str {
        "tvdb"
    }

    async fn search(
        &self,
        _media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        let url = format!("{}/search/series?name={}", BASE_URL, urlencode(query));
        let response: SearchResponse = match self.get_json(&url, "TVDB search").await {
            Ok(r) => r,
            // TVDB signals "no matches" as 404
            Err(ProviderError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut candidates: Vec<SearchCandidate> = response
            .data
            .into_iter()
            .filter_map(|series| {
                let title = series.series_name?;
                Some(SearchCandidate {
                    provider: "tvdb".into(),
                    ext_id: series.id.to_string(),
                    title,
                    year: year_from_date(series.first_aired.as_deref()),
                })
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
        let url = format!("{}/series/{}", BASE_URL, ext_id);
        let response: SeriesResponse = self.get_json(&url, "TVDB series").await?;
        let detail = response.data;
        let title = detail.series_name.unwrap_or_default();

        Ok(ProviderEntity {
            provider: "tvdb".into(),
            entity_type: "series".into(),
            ext_id: detail.id.to_string(),
            title_norm: normalize_title(&title),
            title,
            year: year_from_date(detail.first_aired.as_deref()),
            metadata: serde_json::json!({
                "overview": detail.overview,
                "status": detail.status,
            }),
            fetched_at: 0,
            ttl_seconds: 0,
        })
    }

    async fn list_children(
        &self,
        _media_type: MediaType,
        ext_id: &str,
    ) -> Result<Children, ProviderError> {
        let mut episodes = Vec::new();
        let mut page: i64 = 1;

        loop {
            let url = format!("{}/series/{}/episodes?page={}", BASE_URL, ext_id, page);
            let response: EpisodesResponse = self.get_json(&url, "TVDB episodes").await?;

            for entry in response.data {
                let (Some(season), Some(number)) = (entry.aired_season, entry.aired_episode_number)
                else {
                    continue;
                };
                episodes.push(EpisodeRecord {
                    provider: "tvdb".into(),
                    series_id: ext_id.to_string(),
                    season,
                    episode: number,
                    title: entry.episode_name.unwrap_or_default(),
                    air_date: entry.first_aired,
                });
            }

            match response.links.and_then(|l| l.next) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        episodes.sort_by_key(|e| (e.season, e.episode));
        Ok(Children::Episodes(episodes))
    }
}

pub(crate) fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push_str("%20"),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_extraction_from_air_date() {
        assert_eq!(year_from_date(Some("2015-09-28")), Some(2015));
        assert_eq!(year_from_date(Some("")), None);
        assert_eq!(year_from_date(None), None);
    }

    #[test]
    fn urlencode_escapes_reserved() {
        assert_eq!(urlencode("Danger Mouse"), "Danger%20Mouse");
        assert_eq!(urlencode("a&b=c"), "a%26b%3Dc");
    }

    #[test]
    fn episode_entries_without_numbers_are_dropped() {
        let raw = r#"{"data": [
            {"airedSeason": 1, "airedEpisodeNumber": 1, "episodeName": "Pilot"},
            {"airedSeason": null, "airedEpisodeNumber": 2, "episodeName": "Ghost"}
        ]}"#;
        let parsed: EpisodesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.len(), 2);
        let valid: Vec<_> = parsed
            .data
            .iter()
            .filter(|e| e.aired_season.is_some() && e.aired_episode_number.is_some())
            .collect();
        assert_eq!(valid.len(), 1);
    }
}
