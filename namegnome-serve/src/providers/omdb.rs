//! OMDb API client, movie search fallback
//!
//! Joins the movie chain only when `OMDB_API_KEY` is configured.
//! - Search: GET /?apikey=...&s=...&type=movie[&y=...]
//! - Detail: GET /?apikey=...&i={imdb_id}

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

const BASE_URL: &str = "https://www.omdbapi.com/";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "Search", default)]
    search: Vec<SearchEntry>,
    #[serde(rename = "Response")]
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "imdbID")]
    imdb_id: String,
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "imdbID")]
    imdb_id: Option<String>,
    #[serde(rename = "Plot")]
    plot: Option<String>,
}

fn parse_year(raw: Option<&str>) -> Option<i32> {
    raw.and_then(|y| y.get(..4)).and_then(|y| y.parse().ok())
}

/// OMDb fallback provider for movies.
pub struct OmdbProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OmdbProvider {
    pub fn from_env() -> namegnome_common::Result<Self> {
        let api_key = AppConfig::require_api_key("OMDB_API_KEY")?;
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
impl MetadataProvider for OmdbProvider {
    fn name(&self) -> &'static str {
        "omdb"
    }

    async fn search(
        &self,
        _media_type: MediaType,
        query: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>, ProviderError> {
        let mut url = format!(
            "{}?apikey={}&s={}&type=movie",
            BASE_URL,
            self.api_key,
            urlencode(query)
        );
        if let Some(year) = year {
            url.push_str(&format!("&y={}", year));
        }

        let response: SearchResponse = self.get_json(&url, "OMDb search").await?;
        if response.response.as_deref() == Some("False") {
            return Ok(Vec::new());
        }

        Ok(response
            .search
            .into_iter()
            .map(|entry| SearchCandidate {
                provider: "omdb".into(),
                year: parse_year(entry.year.as_deref()),
                ext_id: entry.imdb_id,
                title: entry.title,
            })
            .collect())
    }

    async fn fetch(
        &self,
        _media_type: MediaType,
        ext_id: &str,
    ) -> Result<ProviderEntity, ProviderError> {
        let url = format!("{}?apikey={}&i={}", BASE_URL, self.api_key, ext_id);
        let detail: DetailResponse = self.get_json(&url, "OMDb detail").await?;
        let title = detail.title.unwrap_or_default();

        Ok(ProviderEntity {
            provider: "omdb".into(),
            entity_type: "movie".into(),
            ext_id: detail.imdb_id.unwrap_or_else(|| ext_id.to_string()),
            title_norm: normalize_title(&title),
            title,
            year: parse_year(detail.year.as_deref()),
            metadata: serde_json::json!({ "plot": detail.plot }),
            fetched_at: 0,
            ttl_seconds: 0,
        })
    }

    async fn list_children(
        &self,
        _media_type: MediaType,
        _ext_id: &str,
    ) -> Result<Children, ProviderError> {
        Ok(Children::Episodes(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_results_response_parses() {
        let raw = r#"{"Response": "False", "Error": "Movie not found!"}"#;
        let parsed: SearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.response.as_deref(), Some("False"));
        assert!(parsed.search.is_empty());
    }

    #[test]
    fn year_ranges_truncate_to_first_year() {
        assert_eq!(parse_year(Some("2015-2019")), Some(2015));
        assert_eq!(parse_year(Some("1999")), Some(1999));
    }
}
