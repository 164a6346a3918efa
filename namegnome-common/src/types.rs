//! Core pipeline types for the scan/plan/apply pipeline
//!
//! These types define the data structures used throughout NameGnome Serve:
//! - `ScanResult`: output from the scan phase
//! - `PlanItem` / `PlanReview`: the plan artifact
//! - `ApplyMode` / `CollisionStrategy`: apply executor controls

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Declared media type of a scan root. Never guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Tv,
    Movie,
    Music,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Tv => "tv",
            MediaType::Movie => "movie",
            MediaType::Music => "music",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tv" => Some(MediaType::Tv),
            "movie" => Some(MediaType::Movie),
            "music" => Some(MediaType::Music),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Segment metadata for anthology-aware TV parsing.
///
/// A segment is a contiguous episode-like subunit within a filename: an
/// integer interval plus the tokenised title words the parser attributed
/// to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeSegment {
    pub start: Option<i32>,
    pub end: Option<i32>,
    #[serde(default)]
    pub title_tokens: Vec<String>,
    pub raw_span: Option<String>,
}

impl EpisodeSegment {
    pub fn new(start: Option<i32>, end: Option<i32>, title_tokens: Vec<String>) -> Self {
        let raw_span = match (start, end) {
            (Some(a), Some(b)) if a != b => Some(format!("E{:02}-E{:02}", a, b)),
            (Some(a), _) => Some(format!("E{:02}", a)),
            _ => None,
        };
        Self {
            start,
            end,
            title_tokens,
            raw_span,
        }
    }
}

/// Metadata for a single media file discovered during scan.
///
/// Immutable after scan: planning never mutates these records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: i64,
    /// SHA-256 of file contents, when hashing was requested
    pub hash: Option<String>,
    pub media_type: MediaType,
    pub parsed_title: Option<String>,
    pub parsed_year: Option<i32>,
    pub parsed_season: Option<i32>,
    pub parsed_episode: Option<i32>,
    pub parsed_episode_end: Option<i32>,
    pub parsed_episode_title: Option<String>,
    pub parsed_track: Option<i32>,
    pub parsed_artist: Option<String>,
    pub parsed_album: Option<String>,
    #[serde(default)]
    pub anthology_candidate: bool,
    #[serde(default)]
    pub segments: Vec<EpisodeSegment>,
}

/// Output of the scan phase: an ordered file list bound to a filesystem
/// fingerprint so a later apply can detect drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub root_path: PathBuf,
    pub media_type: MediaType,
    pub files: Vec<MediaFile>,
    pub total_size: u64,
    pub file_count: usize,
    /// SHA-256 over `path\n mtime\n` lines in scan order
    pub source_fingerprint: String,
}

/// Reference to an external metadata provider entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub provider: String,
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

/// Which pass produced a plan item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Deterministic,
    Llm,
}

/// Confidence bucket derived from the numeric confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBucket {
    High,
    Medium,
    Low,
}

impl ConfidenceBucket {
    /// `>= 0.90 -> high`, `>= 0.70 -> medium`, else `low`.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.90 {
            ConfidenceBucket::High
        } else if confidence >= 0.70 {
            ConfidenceBucket::Medium
        } else {
            ConfidenceBucket::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBucket::High => "high",
            ConfidenceBucket::Medium => "medium",
            ConfidenceBucket::Low => "low",
        }
    }
}

/// Episode coordinates attached to a TV plan item destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeDst {
    pub season: i32,
    pub episode_start: i32,
    pub episode_end: i32,
    pub titles: Vec<String>,
}

/// Movie coordinates attached to a movie plan item destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieDst {
    pub title: String,
    pub year: i32,
}

/// Track coordinates attached to a music plan item destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDst {
    pub artist: String,
    pub album: String,
    pub disc: i32,
    pub track: i32,
    pub title: String,
}

/// Source half of a plan item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSrc {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<EpisodeSegment>,
}

/// Destination half of a plan item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDst {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<EpisodeDst>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movie: Option<MovieDst>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackDst>,
}

/// A losing candidate retained alongside the winning plan item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAlternative {
    pub origin: Origin,
    pub confidence: f64,
    pub dst_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Pending disambiguation attached to a plan item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDisambiguation {
    pub token: String,
    pub field: String,
    pub candidates: Vec<DisambigCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested: Option<String>,
}

/// One selectable entity in a disambiguation prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisambigCandidate {
    pub provider: String,
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

/// Individual rename operation in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: String,
    pub origin: Origin,
    pub confidence: f64,
    pub confidence_bucket: ConfidenceBucket,
    pub src: PlanSrc,
    pub dst: PlanDst,
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub anthology: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disambiguation: Option<PlanDisambiguation>,
    #[serde(default)]
    pub alternatives: Vec<PlanAlternative>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<String>,
}

/// Recorded source file state inside a plan group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSrcFile {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Aggregate stats for the items of one source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRollup {
    pub count: usize,
    pub confidence_min: f64,
    pub confidence_max: f64,
    pub warnings: Vec<String>,
}

/// Items clustered by source file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanGroup {
    pub group_key: String,
    pub src_file: GroupSrcFile,
    /// IDs into `PlanReview.items`; groups never embed items
    pub item_ids: Vec<String>,
    pub rollup: GroupRollup,
}

/// Counts rolled up across the whole plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_items: usize,
    pub by_origin: std::collections::BTreeMap<String, usize>,
    pub by_confidence: std::collections::BTreeMap<String, usize>,
    pub warnings: usize,
    pub anthology_candidates: usize,
    pub disambiguations_required: usize,
}

/// The authoritative plan artifact.
///
/// A `PlanReview` is a value: re-planning produces a new one, nothing
/// mutates an existing one. Serialising twice (masking `generated_at`)
/// yields byte-identical output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReview {
    pub plan_id: String,
    pub schema_version: String,
    pub generated_at: String,
    pub scan_id: String,
    pub source_fingerprint: String,
    pub media_type: MediaType,
    pub summary: PlanSummary,
    pub groups: Vec<PlanGroup>,
    pub items: Vec<PlanItem>,
    pub notes: Vec<String>,
}

pub const PLAN_SCHEMA_VERSION: &str = "1.0";

/// Apply execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    DryRun,
    Transactional,
    ContinueOnError,
}

impl Default for ApplyMode {
    fn default() -> Self {
        ApplyMode::Transactional
    }
}

/// Destination collision handling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionStrategy {
    Skip,
    Overwrite,
    Backup,
}

impl Default for CollisionStrategy {
    fn default() -> Self {
        CollisionStrategy::Backup
    }
}

/// Outcome of applying one plan item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Applied,
    SkippedCollision,
    SkippedStale,
    Failed,
    Noop,
    RolledBack,
}

/// Per-item result inside an [`ApplyResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub item_id: String,
    pub src: PathBuf,
    pub dst: PathBuf,
    pub status: ApplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
}

/// Result of an apply invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub report_id: String,
    pub plan_id: String,
    pub mode: ApplyMode,
    pub total_items: usize,
    pub applied_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub outcomes: Vec<ApplyOutcome>,
    /// Present in continue-on-error mode when at least one rename committed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_token: Option<String>,
}
