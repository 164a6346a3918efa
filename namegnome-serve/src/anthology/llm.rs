//! LLM grouping assist for residual anthology ambiguity
//!
//! Invoked only when the deterministic pass leaves unresolved flags or
//! low confidence. The model receives the parsed segments, the
//! deterministic groups, and the canonical episode list, and returns a
//! grouping as JSON. Output that fails schema validation is rejected and
//! the deterministic result stands, with an `llm_unavailable` warning.
//! The LLM is never authoritative about metadata, only about grouping.

use crate::anthology::{AnthologyResolution, CanonicalEpisode, ResolvedGroup};
use async_trait::async_trait;
use namegnome_common::types::EpisodeSegment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const WARN_LLM_UNAVAILABLE: &str = "llm_unavailable";

/// Everything the assist gets to see.
#[derive(Debug, Clone, Serialize)]
pub struct AssistRequest {
    pub season: i32,
    pub segments: Vec<EpisodeSegment>,
    pub deterministic_groups: Vec<AssistGroup>,
    pub canonical_episodes: Vec<AssistEpisode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistEpisode {
    pub number: i32,
    pub title: String,
}

/// One grouping in the assist exchange (both directions).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistGroup {
    pub season: i32,
    pub episodes: Vec<i32>,
    pub titles: Vec<String>,
    pub confidence: f64,
}

/// Schema-validated assist response.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistGrouping {
    pub groups: Vec<AssistGroup>,
}

/// Grouping assist seam; the Ollama client implements it, tests mock it.
#[async_trait]
pub trait GroupingAssist: Send + Sync {
    async fn regroup(&self, request: &AssistRequest) -> namegnome_common::Result<AssistGrouping>;
}

impl AssistRequest {
    pub fn new(
        season: i32,
        segments: &[EpisodeSegment],
        resolution: &AnthologyResolution,
        canonical: &[CanonicalEpisode],
    ) -> Self {
        Self {
            season,
            segments: segments.to_vec(),
            deterministic_groups: resolution
                .groups
                .iter()
                .map(|g| AssistGroup {
                    season,
                    episodes: g.episodes.clone(),
                    titles: g.titles.clone(),
                    confidence: resolution.confidence,
                })
                .collect(),
            canonical_episodes: canonical
                .iter()
                .map(|e| AssistEpisode {
                    number: e.number,
                    title: e.title.clone(),
                })
                .collect(),
        }
    }
}

/// Validate a raw model reply against the grouping schema.
///
/// Required shape: `{"groups": [{"season": int, "episodes": [int, ...],
/// "titles": [str, ...], "confidence": 0..=1}, ...]}`. Episode lists must
/// be non-empty, sorted, and contiguous.
pub fn validate_grouping(raw: &Value) -> namegnome_common::Result<AssistGrouping> {
    use namegnome_common::Error;

    let groups = raw
        .get("groups")
        .and_then(|g| g.as_array())
        .ok_or_else(|| Error::SchemaViolation("missing 'groups' array".into()))?;

    let mut validated = Vec::with_capacity(groups.len());
    for (index, group) in groups.iter().enumerate() {
        let season = group
            .get("season")
            .and_then(|s| s.as_i64())
            .ok_or_else(|| Error::SchemaViolation(format!("group {}: bad 'season'", index)))?;

        let episodes: Vec<i32> = group
            .get("episodes")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::SchemaViolation(format!("group {}: bad 'episodes'", index)))?
            .iter()
            .map(|e| {
                e.as_i64()
                    .map(|n| n as i32)
                    .ok_or_else(|| Error::SchemaViolation(format!("group {}: non-integer episode", index)))
            })
            .collect::<namegnome_common::Result<_>>()?;

        if episodes.is_empty() {
            return Err(Error::SchemaViolation(format!("group {}: empty episode list", index)));
        }
        for pair in episodes.windows(2) {
            if pair[1] != pair[0] + 1 {
                return Err(Error::SchemaViolation(format!(
                    "group {}: episodes not contiguous",
                    index
                )));
            }
        }

        let titles: Vec<String> = group
            .get("titles")
            .and_then(|t| t.as_array())
            .ok_or_else(|| Error::SchemaViolation(format!("group {}: bad 'titles'", index)))?
            .iter()
            .map(|t| {
                t.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| Error::SchemaViolation(format!("group {}: non-string title", index)))
            })
            .collect::<namegnome_common::Result<_>>()?;

        let confidence = group
            .get("confidence")
            .and_then(|c| c.as_f64())
            .ok_or_else(|| Error::SchemaViolation(format!("group {}: bad 'confidence'", index)))?;
        if !(0.0..=1.0).contains(&confidence) || !confidence.is_finite() {
            return Err(Error::SchemaViolation(format!(
                "group {}: confidence out of range",
                index
            )));
        }

        validated.push(AssistGroup {
            season: season as i32,
            episodes,
            titles,
            confidence,
        });
    }

    Ok(AssistGrouping { groups: validated })
}

/// Convert a validated assist grouping back into resolver groups.
pub fn grouping_to_groups(grouping: &AssistGrouping) -> Vec<ResolvedGroup> {
    grouping
        .groups
        .iter()
        .map(|g| ResolvedGroup {
            start: *g.episodes.first().unwrap_or(&0),
            end: *g.episodes.last().unwrap_or(&0),
            episodes: g.episodes.clone(),
            titles: g.titles.clone(),
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

const SYSTEM_PROMPT: &str = "You group multi-episode TV files against a canonical episode list. \
Respond with JSON only: {\"groups\": [{\"season\": int, \"episodes\": [int], \
\"titles\": [string], \"confidence\": number}]}. Episodes must be contiguous \
and come from the canonical list. Never invent episodes or titles.";

/// Ollama-backed grouping assist.
pub struct OllamaAssist {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaAssist {
    pub fn new(base_url: String, model: String, timeout: Duration) -> namegnome_common::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| namegnome_common::Error::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            model,
        })
    }
}

#[async_trait]
impl GroupingAssist for OllamaAssist {
    async fn regroup(&self, request: &AssistRequest) -> namegnome_common::Result<AssistGrouping> {
        use namegnome_common::Error;

        let payload = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: serde_json::to_string(request)
                        .map_err(|e| Error::SchemaViolation(e.to_string()))?,
                },
            ],
            stream: false,
            format: "json",
        };

        tracing::debug!(model = %self.model, "Invoking LLM grouping assist");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::SchemaViolation(format!("LLM unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::SchemaViolation(format!(
                "LLM returned HTTP {}",
                response.status()
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::SchemaViolation(format!("LLM response unreadable: {}", e)))?;

        let raw: Value = serde_json::from_str(&chat.message.content)
            .map_err(|e| Error::SchemaViolation(format!("LLM output is not JSON: {}", e)))?;

        validate_grouping(&raw)
    }
}
