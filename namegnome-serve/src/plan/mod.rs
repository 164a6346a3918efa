//! Plan assembly: candidates in, stable `PlanReview` artifact out
//!
//! Merges deterministic and LLM candidates per source segment, buckets
//! confidence, orders items naturally, clusters groups by source file,
//! and serialises to byte-reproducible canonical JSON (sorted keys,
//! UTF-8, ISO-8601 UTC timestamps, no NaN).

pub mod engine;

use crate::mapper::Candidate;
use namegnome_common::naming::natural_cmp;
use namegnome_common::types::{
    ConfidenceBucket, GroupRollup, GroupSrcFile, MediaFile, MediaType, Origin, PlanAlternative,
    PlanDst, PlanGroup, PlanItem, PlanReview, PlanSrc, PlanSummary, ScanResult,
    PLAN_SCHEMA_VERSION,
};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const WARN_TIE_BREAKER: &str = "tie_breaker_deterministic_preferred";

/// Minimum confidence gap for an LLM candidate to displace a
/// deterministic one.
const MERGE_DELTA: f64 = 0.10;

/// Deterministic plan id bound to the scan it was computed from.
pub fn derive_plan_id(scan_id: &str, source_fingerprint: &str, media_type: MediaType) -> String {
    let digest = Sha256::digest(
        format!("{}\n{}\n{}", scan_id, source_fingerprint, media_type.as_str()).as_bytes(),
    );
    let hex = format!("{:x}", digest);
    format!("pln_{}", &hex[..16])
}

/// ISO-8601 UTC with trailing Z, second precision.
pub fn format_generated_at(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Assemble the authoritative plan artifact from per-file candidates.
pub fn assemble(
    scan: &ScanResult,
    candidates: Vec<Candidate>,
    generated_at: chrono::DateTime<chrono::Utc>,
) -> PlanReview {
    let media_by_src: BTreeMap<String, &MediaFile> = scan
        .files
        .iter()
        .map(|f| (f.path.to_string_lossy().into_owned(), f))
        .collect();

    // Merge policy: candidates compete per (src path, segment start)
    let mut slots: BTreeMap<(String, i32), Vec<Candidate>> = BTreeMap::new();
    for candidate in candidates {
        let key = (
            candidate.src_path.to_string_lossy().into_owned(),
            candidate
                .segment
                .as_ref()
                .and_then(|s| s.start)
                .unwrap_or(0),
        );
        slots.entry(key).or_default().push(candidate);
    }

    let mut merged: Vec<(Candidate, Vec<PlanAlternative>, bool)> = Vec::new();
    for (_, slot) in slots {
        merged.push(merge_slot(slot));
    }

    // Stable ordering: natural case-insensitive src path, then
    // media-specific in-group ordering.
    let media_type = scan.media_type;
    merged.sort_by(|(a, _, _), (b, _, _)| compare_candidates(media_type, a, b));

    let mut items: Vec<PlanItem> = Vec::with_capacity(merged.len());
    for (index, (candidate, alternatives, tie)) in merged.into_iter().enumerate() {
        let mut warnings = candidate.warnings.clone();
        if tie && !warnings.iter().any(|w| w == WARN_TIE_BREAKER) {
            warnings.push(WARN_TIE_BREAKER.to_string());
        }
        warnings.sort();
        warnings.dedup();

        items.push(PlanItem {
            id: format!("pli_{:04}", index + 1),
            origin: candidate.origin,
            confidence: round_confidence(candidate.confidence),
            confidence_bucket: ConfidenceBucket::from_confidence(candidate.confidence),
            src: PlanSrc {
                path: candidate.src_path,
                segment: candidate.segment,
            },
            dst: PlanDst {
                path: candidate.dst_path,
                episode: candidate.episode,
                movie: candidate.movie,
                track: candidate.track,
            },
            sources: candidate.sources,
            warnings,
            anthology: candidate.anthology,
            disambiguation: None,
            alternatives,
            explain: candidate.explain,
        });
    }

    let groups = build_groups(&items, &media_by_src);
    let summary = build_summary(&items);
    let notes = build_notes(&items);

    PlanReview {
        plan_id: derive_plan_id(&scan.scan_id, &scan.source_fingerprint, media_type),
        schema_version: PLAN_SCHEMA_VERSION.to_string(),
        generated_at: format_generated_at(generated_at),
        scan_id: scan.scan_id.clone(),
        source_fingerprint: scan.source_fingerprint.clone(),
        media_type,
        summary,
        groups,
        items,
        notes,
    }
}

/// Confidence values are plain fractions; clamp away float dust so the
/// serialised artifact stays reproducible.
fn round_confidence(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Pick the winner for one segment slot.
fn merge_slot(mut slot: Vec<Candidate>) -> (Candidate, Vec<PlanAlternative>, bool) {
    let best_det = best_of(&slot, Origin::Deterministic);
    let best_llm = best_of(&slot, Origin::Llm);

    let (winner_index, tie) = match (best_det, best_llm) {
        (Some((det_index, det_conf)), Some((llm_index, llm_conf))) => {
            if llm_conf - det_conf >= MERGE_DELTA {
                (llm_index, false)
            } else if det_conf - llm_conf >= MERGE_DELTA {
                (det_index, false)
            } else {
                (det_index, true)
            }
        }
        (Some((det_index, _)), None) => (det_index, false),
        (None, Some((llm_index, _))) => (llm_index, false),
        (None, None) => unreachable!("merge_slot called with empty slot"),
    };

    let winner = slot.remove(winner_index);
    let alternatives = slot
        .into_iter()
        .map(|candidate| PlanAlternative {
            origin: candidate.origin,
            confidence: round_confidence(candidate.confidence),
            dst_path: candidate.dst_path,
            reason: candidate.explain,
        })
        .collect();
    (winner, alternatives, tie)
}

fn best_of(slot: &[Candidate], origin: Origin) -> Option<(usize, f64)> {
    slot.iter()
        .enumerate()
        .filter(|(_, c)| c.origin == origin)
        .fold(None, |best, (index, c)| match best {
            Some((_, conf)) if conf >= c.confidence => best,
            _ => Some((index, c.confidence)),
        })
}

fn compare_candidates(media_type: MediaType, a: &Candidate, b: &Candidate) -> Ordering {
    let src_a = a.src_path.to_string_lossy();
    let src_b = b.src_path.to_string_lossy();
    natural_cmp(&src_a, &src_b).then_with(|| match media_type {
        MediaType::Tv => {
            let key = |c: &Candidate| {
                c.episode
                    .as_ref()
                    .map(|e| (e.season, e.episode_start, e.episode_end))
                    .unwrap_or((i32::MAX, i32::MAX, i32::MAX))
            };
            key(a).cmp(&key(b))
        }
        MediaType::Movie => {
            let key = |c: &Candidate| {
                c.movie
                    .as_ref()
                    .map(|m| (m.year, m.title.clone()))
                    .unwrap_or((i32::MAX, String::new()))
            };
            key(a).cmp(&key(b))
        }
        MediaType::Music => {
            let key = |c: &Candidate| {
                c.track
                    .as_ref()
                    .map(|t| (t.disc, t.track))
                    .unwrap_or((i32::MAX, i32::MAX))
            };
            key(a).cmp(&key(b))
        }
    })
    .then_with(|| {
        natural_cmp(
            &a.dst_path.to_string_lossy(),
            &b.dst_path.to_string_lossy(),
        )
    })
}

fn build_groups(items: &[PlanItem], media_by_src: &BTreeMap<String, &MediaFile>) -> Vec<PlanGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut by_src: BTreeMap<String, Vec<&PlanItem>> = BTreeMap::new();
    for item in items {
        let key = item.src.path.to_string_lossy().into_owned();
        if !by_src.contains_key(&key) {
            order.push(key.clone());
        }
        by_src.entry(key).or_default().push(item);
    }

    order
        .into_iter()
        .map(|src_path| {
            let group_items = &by_src[&src_path];
            let confidences: Vec<f64> = group_items.iter().map(|i| i.confidence).collect();
            let mut warnings: Vec<String> = group_items
                .iter()
                .flat_map(|i| i.warnings.iter().cloned())
                .collect();
            warnings.sort();
            warnings.dedup();

            let media_file = media_by_src.get(&src_path);
            PlanGroup {
                group_key: src_path.clone(),
                src_file: GroupSrcFile {
                    path: std::path::PathBuf::from(&src_path),
                    size: media_file.map(|f| f.size).unwrap_or(0),
                    mtime: media_file.map(|f| f.mtime).unwrap_or(0),
                    hash: media_file.and_then(|f| f.hash.clone()),
                },
                item_ids: group_items.iter().map(|i| i.id.clone()).collect(),
                rollup: GroupRollup {
                    count: group_items.len(),
                    confidence_min: confidences.iter().cloned().fold(f64::INFINITY, f64::min),
                    confidence_max: confidences.iter().cloned().fold(0.0, f64::max),
                    warnings,
                },
            }
        })
        .collect()
}

fn build_summary(items: &[PlanItem]) -> PlanSummary {
    let mut by_origin: BTreeMap<String, usize> = BTreeMap::new();
    by_origin.insert("deterministic".into(), 0);
    by_origin.insert("llm".into(), 0);
    let mut by_confidence: BTreeMap<String, usize> = BTreeMap::new();
    for bucket in ["high", "medium", "low"] {
        by_confidence.insert(bucket.into(), 0);
    }

    let mut warnings = 0;
    let mut anthology_candidates = 0;
    let mut disambiguations_required = 0;

    for item in items {
        let origin_key = match item.origin {
            Origin::Deterministic => "deterministic",
            Origin::Llm => "llm",
        };
        *by_origin.get_mut(origin_key).unwrap() += 1;
        *by_confidence
            .get_mut(item.confidence_bucket.as_str())
            .unwrap() += 1;
        warnings += item.warnings.len();
        if item.anthology {
            anthology_candidates += 1;
        }
        if item.disambiguation.is_some() {
            disambiguations_required += 1;
        }
    }

    PlanSummary {
        total_items: items.len(),
        by_origin,
        by_confidence,
        warnings,
        anthology_candidates,
        disambiguations_required,
    }
}

fn build_notes(items: &[PlanItem]) -> Vec<String> {
    let mut tie_paths: Vec<String> = items
        .iter()
        .filter(|i| i.warnings.iter().any(|w| w == WARN_TIE_BREAKER))
        .map(|i| i.src.path.to_string_lossy().into_owned())
        .collect();
    tie_paths.sort_by(|a, b| natural_cmp(a, b));
    tie_paths.dedup();

    if tie_paths.is_empty() {
        Vec::new()
    } else {
        vec![format!(
            "Deterministic results preferred for near-ties at: {}",
            tie_paths.join(", ")
        )]
    }
}

/// Canonical serialisation: sorted keys, UTF-8, reproducible bytes after
/// masking `generated_at`.
pub fn to_canonical_json(review: &PlanReview) -> namegnome_common::Result<String> {
    let value = serde_json::to_value(review)
        .map_err(|e| namegnome_common::Error::Fatal(format!("plan serialisation: {}", e)))?;
    serde_json::to_string_pretty(&value)
        .map_err(|e| namegnome_common::Error::Fatal(format!("plan serialisation: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use namegnome_common::types::{EpisodeDst, EpisodeSegment, SourceRef};
    use std::path::PathBuf;

    fn tv_candidate(src: &str, origin: Origin, confidence: f64, start: i32, end: i32) -> Candidate {
        Candidate {
            origin,
            confidence,
            src_path: PathBuf::from(src),
            segment: Some(EpisodeSegment::new(Some(start), Some(end), vec![])),
            dst_path: PathBuf::from(format!("Show/Season 01/Show - S01E{:02}.mkv", start)),
            episode: Some(EpisodeDst {
                season: 1,
                episode_start: start,
                episode_end: end,
                titles: vec![],
            }),
            movie: None,
            track: None,
            sources: vec![SourceRef {
                provider: "tvdb".into(),
                id: "1".into(),
                entity_type: "episode".into(),
            }],
            warnings: vec![],
            anthology: false,
            explain: None,
        }
    }

    fn scan_of(paths: &[&str]) -> ScanResult {
        ScanResult {
            scan_id: "scn_test".into(),
            root_path: PathBuf::from("/media"),
            media_type: MediaType::Tv,
            files: paths
                .iter()
                .map(|p| MediaFile {
                    path: PathBuf::from(p),
                    size: 100,
                    mtime: 1_700_000_000,
                    hash: None,
                    media_type: MediaType::Tv,
                    parsed_title: None,
                    parsed_year: None,
                    parsed_season: None,
                    parsed_episode: None,
                    parsed_episode_end: None,
                    parsed_episode_title: None,
                    parsed_track: None,
                    parsed_artist: None,
                    parsed_album: None,
                    anthology_candidate: false,
                    segments: vec![],
                })
                .collect(),
            total_size: 100,
            file_count: paths.len(),
            source_fingerprint: "abc123".into(),
        }
    }

    fn fixed_time() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc)
    }

    #[test]
    fn near_tie_prefers_deterministic_and_records_alternative() {
        let scan = scan_of(&["/m/a.mkv"]);
        let review = assemble(
            &scan,
            vec![
                tv_candidate("/m/a.mkv", Origin::Deterministic, 0.85, 1, 1),
                tv_candidate("/m/a.mkv", Origin::Llm, 0.90, 1, 2),
            ],
            fixed_time(),
        );

        assert_eq!(review.items.len(), 1);
        let item = &review.items[0];
        assert_eq!(item.origin, Origin::Deterministic);
        assert!(item.warnings.iter().any(|w| w == WARN_TIE_BREAKER));
        assert_eq!(item.alternatives.len(), 1);
        assert_eq!(item.alternatives[0].origin, Origin::Llm);
        assert_eq!(review.notes.len(), 1);
    }

    #[test]
    fn clear_llm_win_takes_the_slot() {
        let scan = scan_of(&["/m/a.mkv"]);
        let review = assemble(
            &scan,
            vec![
                tv_candidate("/m/a.mkv", Origin::Deterministic, 0.7, 1, 1),
                tv_candidate("/m/a.mkv", Origin::Llm, 0.95, 1, 2),
            ],
            fixed_time(),
        );
        assert_eq!(review.items[0].origin, Origin::Llm);
        assert!(review.items[0].warnings.is_empty());
    }

    #[test]
    fn items_sorted_naturally_by_src_path() {
        let scan = scan_of(&["/m/S10.mkv", "/m/S2.mkv"]);
        let review = assemble(
            &scan,
            vec![
                tv_candidate("/m/S10.mkv", Origin::Deterministic, 1.0, 10, 10),
                tv_candidate("/m/S2.mkv", Origin::Deterministic, 1.0, 2, 2),
            ],
            fixed_time(),
        );
        let paths: Vec<String> = review
            .items
            .iter()
            .map(|i| i.src.path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(paths, vec!["/m/S2.mkv", "/m/S10.mkv"]);
        // IDs follow the sorted order
        assert_eq!(review.items[0].id, "pli_0001");
        assert_eq!(review.items[1].id, "pli_0002");
    }

    #[test]
    fn in_group_tv_ordering_by_season_and_episode() {
        let scan = scan_of(&["/m/a.mkv"]);
        let review = assemble(
            &scan,
            vec![
                tv_candidate("/m/a.mkv", Origin::Deterministic, 1.0, 3, 4),
                tv_candidate("/m/a.mkv", Origin::Deterministic, 1.0, 1, 2),
            ],
            fixed_time(),
        );
        assert_eq!(review.items[0].dst.episode.as_ref().unwrap().episode_start, 1);
        assert_eq!(review.items[1].dst.episode.as_ref().unwrap().episode_start, 3);
    }

    #[test]
    fn groups_cluster_by_source_with_rollup() {
        let scan = scan_of(&["/m/a.mkv", "/m/b.mkv"]);
        let mut low = tv_candidate("/m/a.mkv", Origin::Deterministic, 0.6, 3, 3);
        low.warnings.push("gap_present".into());
        let review = assemble(
            &scan,
            vec![
                tv_candidate("/m/a.mkv", Origin::Deterministic, 1.0, 1, 2),
                low,
                tv_candidate("/m/b.mkv", Origin::Deterministic, 0.9, 5, 5),
            ],
            fixed_time(),
        );

        assert_eq!(review.groups.len(), 2);
        let group_a = &review.groups[0];
        assert_eq!(group_a.rollup.count, 2);
        assert!((group_a.rollup.confidence_min - 0.6).abs() < 1e-9);
        assert!((group_a.rollup.confidence_max - 1.0).abs() < 1e-9);
        assert_eq!(group_a.rollup.warnings, vec!["gap_present".to_string()]);
        assert_eq!(group_a.src_file.mtime, 1_700_000_000);
    }

    #[test]
    fn summary_counts_are_complete() {
        let scan = scan_of(&["/m/a.mkv", "/m/b.mkv"]);
        let review = assemble(
            &scan,
            vec![
                tv_candidate("/m/a.mkv", Origin::Deterministic, 1.0, 1, 1),
                tv_candidate("/m/b.mkv", Origin::Deterministic, 0.75, 2, 2),
            ],
            fixed_time(),
        );
        assert_eq!(review.summary.total_items, 2);
        assert_eq!(review.summary.by_origin["deterministic"], 2);
        assert_eq!(review.summary.by_origin["llm"], 0);
        assert_eq!(review.summary.by_confidence["high"], 1);
        assert_eq!(review.summary.by_confidence["medium"], 1);
        assert_eq!(review.summary.by_confidence["low"], 0);
    }

    #[test]
    fn serialization_is_byte_reproducible() {
        let scan = scan_of(&["/m/a.mkv"]);
        let make = || {
            assemble(
                &scan,
                vec![tv_candidate("/m/a.mkv", Origin::Deterministic, 1.0, 1, 1)],
                fixed_time(),
            )
        };
        let first = to_canonical_json(&make()).unwrap();
        let second = to_canonical_json(&make()).unwrap();
        assert_eq!(first, second);
        // Keys come out sorted
        let gen_pos = first.find("\"generated_at\"").unwrap();
        let groups_pos = first.find("\"groups\"").unwrap();
        assert!(gen_pos < groups_pos);
    }

    #[test]
    fn plan_id_is_derived_not_random() {
        assert_eq!(
            derive_plan_id("scn_1", "fp", MediaType::Tv),
            derive_plan_id("scn_1", "fp", MediaType::Tv)
        );
        assert_ne!(
            derive_plan_id("scn_1", "fp", MediaType::Tv),
            derive_plan_id("scn_2", "fp", MediaType::Tv)
        );
    }

    #[test]
    fn generated_at_has_trailing_z() {
        let formatted = format_generated_at(fixed_time());
        assert_eq!(formatted, "2024-06-01T12:00:00Z");
    }
}
