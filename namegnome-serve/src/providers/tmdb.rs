//! TMDB API client for movies
//!
//! - Search: GET /3/search/movie?api_key=...&query=...&year=...
//! - Detail: GET /3/movie/{id}
//!
//! The API key comes from `TMDB_API_KEY` only.

use crate::providers::tvdb::urlencode;
use crate::providers::{
    retry_after_secs, status_to_error, Children, MetadataProvider, ProviderError, SearchCandidate,
};
use async_trait::async_trait;
use namegnome_common::config::AppConfig;
use namegnome_common::db::entities::ProviderEntity;
use namegnome_common::naming::normalize_title;
use namegnome_common::types::MediaType;
use serde::Deserialize;
use std::time::Duration;

const BASE_URL: &str = "https://api.themoviedb.org/3";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<MovieSummary>,
}

#[derive(Debug, Deserialize)]
struct MovieSummary {
    id: i64,
    title: Option<String>,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MovieDetail {
    id: i64,
    title: Option<String>,
    release_date: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    imdb_id: Option<String>,
}

fn year_from_date(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

/// TMDB provider for movies.
pub struct TmdbProvider {
    client: reqwest::Client,
    api_key: String,
}

impl TmdbProvider {
    pub fn from_env() -> namegnome_common::Result<Self> {
        let api_key = AppConfig::require_api_key("TMDB_API_KEY")?;
        Self::new(api_key)
    }

    pub fn new(api_key: String) -> namegnome_common::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| namegnome_common::Error::Config(e.to_string()))?;
        Ok(Self { client, api_key })
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
impl MetadataProvider for TmdbProvider {
    fn name(&self) -> &'static str {
        "tmdb"
    }

    async fn search(
        &self,
        _media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        let mut url = format!(
            "{}/search/movie?api_key={}&query={}",
            BASE_URL,
            self.api_key,
            urlencode(query)
        );
        if let Some(year) = year {
            url.push_str(&format!("&year={}", year));
        }

        let response: SearchResponse = self.get_json(&url, "TMDB search").await?;

        Ok(response
            .results
            .into_iter()
            .filter_map(|movie| {
                let title = movie.title?;
                Some(SearchCandidate {
                    provider: "tmdb".into(),
                    ext_id: movie.id.to_string(),
                    title,
                    year: year_from_date(movie.release_date.as_deref()),
                })
            })
            .collect())
    }

    async fn fetch(
        &self,
        _media_type: MediaType,
        ext_id: &str,
    ) -> Result<ProviderEntity, ProviderError> {
        let url = format!("{}/movie/{}?api_key={}", BASE_URL, ext_id, self.api_key);
        let detail: MovieDetail = self.get_json(&url, "TMDB movie").await?;
        let title = detail.title.unwrap_or_default();

        Ok(ProviderEntity {
            provider: "tmdb".into(),
            entity_type: "movie".into(),
            ext_id: detail.id.to_string(),
            title_norm: normalize_title(&title),
            title,
            year: year_from_date(detail.release_date.as_deref()),
            metadata: serde_json::json!({
                "overview": detail.overview,
                "imdb_id": detail.imdb_id,
            }),
            fetched_at: 0,
            ttl_seconds: 0,
        })
    }

    async fn list_children(
        &self,
        _media_type: MediaType,
        _ext_id: &str,
    ) -> Result<Children, ProviderError> {
        // Movies have no child listing
        Ok(Children::Episodes(Vec::new()))
    }
}
