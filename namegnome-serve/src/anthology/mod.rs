//! Anthology resolver: interval-algebra refinement of episode groupings
//!
//! A TV file may concatenate several canonical episodes, with declared
//! numeric ranges that overlap, gaps, truncated titles, or a shared
//! leading moniker. The deterministic pass refines the parsed segments
//! against the canonical episode list; only residual ambiguity is handed
//! to the LLM assist.
//!
//! Given identical inputs the deterministic pass produces identical
//! output regardless of iteration order or locale.

pub mod llm;

use crate::mapper::titlematch::{self, THETA_MATCH, THETA_SINGLE};
use namegnome_common::db::entities::EpisodeRecord;
use namegnome_common::types::EpisodeSegment;
use std::collections::BTreeSet;

/// Warning classes; each distinct class deducts 0.1 confidence.
pub const WARN_OVERLAP_UNRESOLVED: &str = "overlap_unresolved";
pub const WARN_GAP_PRESENT: &str = "gap_present";
pub const WARN_TITLE_LOW_MATCH: &str = "title_low_match";
pub const WARN_PREFIX_MONIKER_STRIPPED: &str = "prefix_moniker_stripped";
pub const WARN_LOW_TOKEN_OVERLAP: &str = "low_token_overlap";

const CONFIDENCE_FLOOR: f64 = 0.2;
const MONIKER_MAX_TOKENS: usize = 6;

/// One canonical episode of the target season.
#[derive(Debug, Clone)]
pub struct CanonicalEpisode {
    pub number: i32,
    pub title: String,
    tokens: Vec<String>,
}

impl CanonicalEpisode {
    pub fn new(number: i32, title: &str) -> Self {
        Self {
            number,
            title: title.to_string(),
            tokens: titlematch::tokenize(title),
        }
    }

    /// Build the season's canonical list from cached episode rows.
    pub fn from_records(records: &[EpisodeRecord]) -> Vec<Self> {
        let mut episodes: Vec<Self> = records
            .iter()
            .map(|r| Self::new(r.episode, &r.title))
            .collect();
        episodes.sort_by_key(|e| e.number);
        episodes.dedup_by_key(|e| e.number);
        episodes
    }
}

/// One resolved grouping: a contiguous canonical episode interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGroup {
    pub start: i32,
    pub end: i32,
    pub episodes: Vec<i32>,
    pub titles: Vec<String>,
}

/// Output of the deterministic pass.
#[derive(Debug, Clone)]
pub struct AnthologyResolution {
    pub groups: Vec<ResolvedGroup>,
    pub warnings: Vec<String>,
    pub confidence: f64,
    /// Unresolved flags or confidence below 0.9: invoke the LLM assist
    pub needs_assist: bool,
}

#[derive(Debug, Clone)]
struct Seg {
    start: i32,
    end: i32,
    tokens: Vec<String>,
}

/// Deterministic interval simplification.
pub fn resolve_intervals(
    segments: &[EpisodeSegment],
    canonical: &[CanonicalEpisode],
) -> AnthologyResolution {
    let mut warnings: BTreeSet<&'static str> = BTreeSet::new();

    // Canonical titles with any shared leading moniker stripped
    let (canonical, canonical_moniker) = strip_canonical_moniker(canonical);

    // 1. Sort & normalise: coerce a <= b, drop number-less segments into a
    //    side list for title-only assignment.
    let mut numbered: Vec<Seg> = Vec::new();
    let mut unnumbered: Vec<Vec<String>> = Vec::new();
    for segment in segments {
        let tokens = strip_moniker_prefix(
            titlematch::canonicalize_tokens(&segment.title_tokens),
            canonical_moniker.as_deref(),
            &mut warnings,
        );
        match (segment.start, segment.end) {
            (Some(a), Some(b)) => numbered.push(Seg {
                start: a.min(b),
                end: a.max(b),
                tokens,
            }),
            (Some(a), None) | (None, Some(a)) => numbered.push(Seg {
                start: a,
                end: a,
                tokens,
            }),
            (None, None) => unnumbered.push(tokens),
        }
    }
    numbered.sort_by_key(|s| (s.start, s.end));

    // Shared leading phrase across >= 2 adjacent segments
    strip_segment_moniker(&mut numbered, &mut warnings);

    // 2. Overlap resolution
    resolve_overlaps(&mut numbered, &canonical, &mut warnings);

    // 3. Gap detection and single-episode insertion
    detect_gaps(&mut numbered, &canonical, &mut warnings);

    // Title-only assignment for segments without numbers
    for tokens in &unnumbered {
        match unique_match(tokens, &canonical, None) {
            Some(number) => numbered.push(Seg {
                start: number,
                end: number,
                tokens: tokens.clone(),
            }),
            None => {
                warnings.insert(WARN_TITLE_LOW_MATCH);
            }
        }
    }
    numbered.sort_by_key(|s| (s.start, s.end));

    // 4. Singleton collapse
    singleton_collapse(&mut numbered, &canonical, &mut warnings);

    // 5. Title-sequence expansion: a single token blob spanning several
    //    consecutive canonical titles widens its interval over them.
    expand_title_cover(&mut numbered, &canonical, &mut warnings);

    // Residual overlaps after all refinement
    for pair in numbered.windows(2) {
        if pair[1].start <= pair[0].end {
            warnings.insert(WARN_OVERLAP_UNRESOLVED);
        }
    }

    let groups = build_groups(&numbered, &canonical, &mut warnings);

    let confidence =
        (1.0 - 0.1 * warnings.len() as f64).max(CONFIDENCE_FLOOR);
    let needs_assist = warnings.contains(WARN_OVERLAP_UNRESOLVED)
        || warnings.contains(WARN_GAP_PRESENT)
        || confidence < 0.9;

    AnthologyResolution {
        groups,
        warnings: warnings.iter().map(|w| w.to_string()).collect(),
        confidence,
        needs_assist,
    }
}

fn canonical_by_number<'a>(
    canonical: &'a [CanonicalEpisode],
    number: i32,
) -> Option<&'a CanonicalEpisode> {
    canonical.iter().find(|e| e.number == number)
}

/// Longest leading token phrase (max 6 tokens) shared by at least two
/// adjacent canonical titles. Returns the stripped list and the phrase.
fn strip_canonical_moniker(
    canonical: &[CanonicalEpisode],
) -> (Vec<CanonicalEpisode>, Option<Vec<String>>) {
    let mut best: Option<Vec<String>> = None;
    for pair in canonical.windows(2) {
        let shared: Vec<String> = pair[0]
            .tokens
            .iter()
            .zip(pair[1].tokens.iter())
            .take(MONIKER_MAX_TOKENS)
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.clone())
            .collect();
        if shared.len() >= 2 && shared.len() > best.as_ref().map(|b| b.len()).unwrap_or(0) {
            best = Some(shared);
        }
    }

    let Some(moniker) = best else {
        return (canonical.to_vec(), None);
    };

    let stripped = canonical
        .iter()
        .map(|episode| {
            let mut copy = episode.clone();
            if copy.tokens.len() > moniker.len() && copy.tokens.starts_with(&moniker) {
                copy.tokens = copy.tokens[moniker.len()..].to_vec();
            }
            copy
        })
        .collect();
    (stripped, Some(moniker))
}

/// Strip the canonical moniker from a segment token blob when it leads it.
fn strip_moniker_prefix(
    tokens: Vec<String>,
    moniker: Option<&[String]>,
    warnings: &mut BTreeSet<&'static str>,
) -> Vec<String> {
    let Some(moniker) = moniker else {
        return tokens;
    };
    if tokens.len() > moniker.len() && tokens.starts_with(moniker) {
        warnings.insert(WARN_PREFIX_MONIKER_STRIPPED);
        return tokens[moniker.len()..].to_vec();
    }
    tokens
}

/// Shared leading phrase on >= 2 adjacent segments is a moniker too.
fn strip_segment_moniker(segments: &mut [Seg], warnings: &mut BTreeSet<&'static str>) {
    if segments.len() < 2 {
        return;
    }
    let mut shared: Option<Vec<String>> = None;
    for pair in segments.windows(2) {
        let prefix: Vec<String> = pair[0]
            .tokens
            .iter()
            .zip(pair[1].tokens.iter())
            .take(MONIKER_MAX_TOKENS)
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.clone())
            .collect();
        if prefix.len() >= 2 && prefix.len() > shared.as_ref().map(|s| s.len()).unwrap_or(0) {
            shared = Some(prefix);
        }
    }
    let Some(moniker) = shared else {
        return;
    };
    let mut applied = false;
    for segment in segments.iter_mut() {
        if segment.tokens.len() > moniker.len() && segment.tokens.starts_with(&moniker) {
            segment.tokens = segment.tokens[moniker.len()..].to_vec();
            applied = true;
        }
    }
    if applied {
        warnings.insert(WARN_PREFIX_MONIKER_STRIPPED);
    }
}

/// For each adjacent overlapping pair, trust the second segment's title:
/// if it matches the canonical episode at its declared start, truncate
/// the first interval back; otherwise push the second interval forward.
fn resolve_overlaps(
    segments: &mut Vec<Seg>,
    canonical: &[CanonicalEpisode],
    warnings: &mut BTreeSet<&'static str>,
) {
    for idx in 0..segments.len().saturating_sub(1) {
        let (first, second) = {
            let (head, tail) = segments.split_at_mut(idx + 1);
            (&mut head[idx], &mut tail[0])
        };

        if second.start > first.end {
            continue;
        }

        // Coverage, not symmetric score: the second segment's blob may span
        // several titles beyond the one at its declared start.
        let second_matches_at_start = canonical_by_number(canonical, second.start)
            .map(|episode| titlematch::coverage(&episode.tokens, &second.tokens) >= THETA_MATCH)
            .unwrap_or(false);

        if second_matches_at_start && second.start > first.start {
            first.end = second.start - 1;
        } else if first.end + 1 <= second.end {
            second.start = first.end + 1;
        } else {
            warnings.insert(WARN_OVERLAP_UNRESOLVED);
        }
    }
}

/// Record gaps between adjacent intervals; a single canonical episode
/// strictly inside a gap whose title the file's tokens cover is inserted.
fn detect_gaps(
    segments: &mut Vec<Seg>,
    canonical: &[CanonicalEpisode],
    warnings: &mut BTreeSet<&'static str>,
) {
    let mut insertions: Vec<Seg> = Vec::new();
    let all_tokens: Vec<String> = segments
        .iter()
        .flat_map(|s| s.tokens.iter().cloned())
        .collect();

    for pair in segments.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.start <= prev.end + 1 {
            continue;
        }

        let inside: Vec<&CanonicalEpisode> = canonical
            .iter()
            .filter(|e| e.number > prev.end && e.number < next.start)
            .collect();

        match inside.as_slice() {
            [single]
                if titlematch::coverage(&single.tokens, &all_tokens) >= THETA_MATCH =>
            {
                insertions.push(Seg {
                    start: single.number,
                    end: single.number,
                    tokens: single.tokens.clone(),
                });
            }
            [] => {
                // Numbering skips an episode the season never had; the
                // canonical list is authoritative, not contiguous.
            }
            _ => {
                warnings.insert(WARN_GAP_PRESENT);
            }
        }
    }

    segments.extend(insertions);
    segments.sort_by_key(|s| (s.start, s.end));
}

/// A multi-episode interval with one title that only matches its first
/// canonical episode collapses to that single episode.
fn singleton_collapse(
    segments: &mut [Seg],
    canonical: &[CanonicalEpisode],
    _warnings: &mut BTreeSet<&'static str>,
) {
    for segment in segments.iter_mut() {
        if segment.start == segment.end || segment.tokens.is_empty() {
            continue;
        }
        let Some(first) = canonical_by_number(canonical, segment.start) else {
            continue;
        };
        if titlematch::score(&segment.tokens, &first.tokens) < THETA_SINGLE {
            continue;
        }
        let rest_matches = (segment.start + 1..=segment.end).any(|number| {
            canonical_by_number(canonical, number)
                .map(|e| titlematch::score(&segment.tokens, &e.tokens) >= THETA_MATCH)
                .unwrap_or(false)
        });
        if !rest_matches {
            segment.end = segment.start;
        }
    }
}

/// Greedy title-sequence cover: when one segment's token blob covers the
/// titles of consecutive canonical episodes starting at its interval,
/// widen the interval across them.
fn expand_title_cover(
    segments: &mut [Seg],
    canonical: &[CanonicalEpisode],
    warnings: &mut BTreeSet<&'static str>,
) {
    for idx in 0..segments.len() {
        let cap = segments
            .get(idx + 1)
            .map(|next| next.start - 1)
            .unwrap_or(i32::MAX);
        let segment = &segments[idx];
        if segment.tokens.is_empty() {
            continue;
        }

        let mut remaining: BTreeSet<String> = segment.tokens.iter().cloned().collect();
        let total = remaining.len();
        let mut matched_end: Option<i32> = None;
        let mut number = segment.start;

        while number <= cap {
            let Some(episode) = canonical_by_number(canonical, number) else {
                break;
            };
            let pool: Vec<String> = remaining.iter().cloned().collect();
            if episode.tokens.is_empty()
                || titlematch::coverage(&episode.tokens, &pool) < THETA_MATCH
            {
                break;
            }
            for token in &episode.tokens {
                remaining.remove(token);
            }
            matched_end = Some(number);
            number += 1;
        }

        let Some(end) = matched_end else {
            if !segment.tokens.is_empty() {
                warnings.insert(WARN_TITLE_LOW_MATCH);
            }
            continue;
        };

        let covered_fraction = 1.0 - remaining.len() as f64 / total.max(1) as f64;
        if end > segments[idx].end && covered_fraction >= THETA_MATCH {
            segments[idx].end = end;
        } else if covered_fraction < THETA_MATCH {
            warnings.insert(WARN_LOW_TOKEN_OVERLAP);
        }
    }
}

fn build_groups(
    segments: &[Seg],
    canonical: &[CanonicalEpisode],
    warnings: &mut BTreeSet<&'static str>,
) -> Vec<ResolvedGroup> {
    segments
        .iter()
        .map(|segment| {
            let episodes: Vec<i32> = (segment.start..=segment.end).collect();
            let titles: Vec<String> = episodes
                .iter()
                .filter_map(|number| {
                    match canonical_by_number(canonical, *number) {
                        Some(episode) => Some(episode.title.clone()),
                        None => {
                            warnings.insert(WARN_TITLE_LOW_MATCH);
                            None
                        }
                    }
                })
                .collect();
            ResolvedGroup {
                start: segment.start,
                end: segment.end,
                episodes,
                titles,
            }
        })
        .collect()
}

/// Pick the canonical episode a token list uniquely matches, restricted
/// to `range` when given. Ties break toward the earlier episode.
fn unique_match(
    tokens: &[String],
    canonical: &[CanonicalEpisode],
    range: Option<(i32, i32)>,
) -> Option<i32> {
    let mut best: Option<(f64, i32)> = None;
    let mut matches = 0;
    for episode in canonical {
        if let Some((lo, hi)) = range {
            if episode.number < lo || episode.number > hi {
                continue;
            }
        }
        let s = titlematch::score(tokens, &episode.tokens);
        if s >= THETA_MATCH {
            matches += 1;
            // Strict improvement only: equal scores keep the earlier episode
            if best.map(|(bs, _)| s > bs).unwrap_or(true) {
                best = Some((s, episode.number));
            }
        }
    }
    if matches == 1 {
        best.map(|(_, number)| number)
    } else {
        None
    }
}
