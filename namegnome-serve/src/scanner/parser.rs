//! Deterministic filename and directory parser for media files
//!
//! Extracts structured fields from filenames following the common library
//! conventions:
//! - TV: `Show Name - SxxEyy[-Eyy] - Episode Title`
//! - Movies: `Movie Title (Year)`
//! - Music: `Artist/Album (Year)/Track## - Track Title`
//!
//! In anthology mode the TV branch additionally emits ordered
//! [`EpisodeSegment`]s: one per declared episode span, each carrying the
//! tokenised title text that follows it.

use namegnome_common::types::{EpisodeSegment, MediaType};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Parsed fields extracted from one path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedName {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub episode_end: Option<i32>,
    pub episode_title: Option<String>,
    pub track: Option<i32>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub segments: Vec<EpisodeSegment>,
}

fn season_episode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)S(\d{1,2})\s*E(\d{1,2})(?:\s*-?\s*E(\d{1,2}))?").unwrap())
}

fn episode_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)E(\d{1,2})(?:\s*-\s*E?(\d{1,2}))?").unwrap())
}

fn dir_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s*\((\d{4})\)").unwrap())
}

fn paren_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d{4})\)").unwrap())
}

/// Normalise separators: dots and underscores become spaces, runs collapse.
fn normalize_whitespace(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();
    let mut out = String::with_capacity(replaced.len());
    let mut last_space = true;
    for c in replaced.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Lowercased word tokens (alphanumeric runs, apostrophes kept inside words).
pub fn tokenize_words(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() || c == '\'' {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn extract_paren_year(text: &str) -> (Option<i32>, String) {
    if let Some(m) = paren_year_re().captures(text) {
        let year = m.get(1).and_then(|y| y.as_str().parse().ok());
        let full = m.get(0).unwrap();
        let mut remaining = String::new();
        remaining.push_str(&text[..full.start()]);
        remaining.push_str(&text[full.end()..]);
        return (year, remaining.trim().to_string());
    }
    (None, text.to_string())
}

/// Show name and year from a `Show Name (Year)` directory component.
fn show_hint_from_dirs(path: &Path) -> (Option<String>, Option<i32>) {
    for component in path.components() {
        let part = component.as_os_str().to_string_lossy();
        if let Some(caps) = dir_year_re().captures(&part) {
            let name = caps.get(1).map(|m| m.as_str().trim().to_string());
            let year = caps.get(2).and_then(|m| m.as_str().parse().ok());
            return (name, year);
        }
    }
    (None, None)
}

fn parse_tv(filename: &str, full_path: &Path, anthology: bool) -> ParsedName {
    let mut result = ParsedName::default();
    let normalized = normalize_whitespace(filename);

    let (dir_title, dir_year) = show_hint_from_dirs(full_path);
    if dir_year.is_some() {
        result.year = dir_year;
    }

    let Some(caps) = season_episode_re().captures(&normalized) else {
        result.title = dir_title.or(Some(normalized));
        return result;
    };

    result.season = caps.get(1).and_then(|m| m.as_str().parse().ok());
    result.episode = caps.get(2).and_then(|m| m.as_str().parse().ok());
    result.episode_end = caps.get(3).and_then(|m| m.as_str().parse().ok());

    let span_match = caps.get(0).unwrap();

    // Show name: text before SxxEyy, else the directory hint
    let before = normalized[..span_match.start()].trim_end_matches([' ', '-']);
    if !before.is_empty() {
        let (year, mut cleaned) = extract_paren_year(before);
        if year.is_some() {
            result.year = year;
        }
        // Trailing bare year ("Danger Mouse 2015") doubles as the year hint
        static TRAILING_YEAR: OnceLock<Regex> = OnceLock::new();
        let trailing =
            TRAILING_YEAR.get_or_init(|| Regex::new(r"^(.*?)\s+((?:19|20)\d{2})$").unwrap());
        let candidate = cleaned.clone();
        if let Some(caps) = trailing.captures(&candidate) {
            if result.year.is_none() {
                result.year = caps.get(2).and_then(|m| m.as_str().parse().ok());
            }
            if let Some(head) = caps.get(1) {
                cleaned = head.as_str().to_string();
            }
        }
        result.title = Some(cleaned).filter(|t| !t.is_empty());
    }
    if result.title.is_none() {
        result.title = dir_title;
    }

    // Episode title: text after the last recognised span
    if anthology {
        result.segments = extract_segments(&normalized[caps.get(1).unwrap().end()..]);
        if let Some(first) = result.segments.first() {
            if result.episode.is_none() {
                result.episode = first.start;
            }
        }
        if let Some(last) = result.segments.last() {
            result.episode_end = last.end.filter(|e| Some(*e) != result.episode);
        }
    }
    let after = normalized[span_match.end()..].trim_start_matches([' ', '-']);
    if !after.is_empty() {
        result.episode_title = Some(after.to_string());
    }

    result
}

/// Ordered episode spans with their trailing title text.
///
/// The input starts right after the season digits, so every `E..` span in
/// it belongs to this file. Text between one span and the next is that
/// span's title.
fn extract_segments(tail: &str) -> Vec<EpisodeSegment> {
    let matches: Vec<_> = episode_span_re().find_iter(tail).collect();
    let mut segments = Vec::with_capacity(matches.len());

    for (idx, m) in matches.iter().enumerate() {
        let caps = episode_span_re().captures(m.as_str()).unwrap();
        let start: Option<i32> = caps.get(1).and_then(|c| c.as_str().parse().ok());
        let end: Option<i32> = caps
            .get(2)
            .and_then(|c| c.as_str().parse().ok())
            .or(start);

        let title_start = m.end();
        let title_end = matches
            .get(idx + 1)
            .map(|next| next.start())
            .unwrap_or(tail.len());
        let title_text = &tail[title_start..title_end];

        segments.push(EpisodeSegment::new(
            start,
            end,
            tokenize_words(title_text),
        ));
    }

    segments
}

fn parse_movie(filename: &str, full_path: &Path) -> ParsedName {
    let mut result = ParsedName::default();
    let normalized = normalize_whitespace(filename);

    let (year, mut remaining) = extract_paren_year(&normalized);
    result.year = year;

    // Strip release noise trailing the title
    static NOISE: OnceLock<Regex> = OnceLock::new();
    let noise =
        NOISE.get_or_init(|| Regex::new(r"(?i)[-\s]*\b(\d{3,4}p|BluRay|WEB-?DL|x26[45]|HDR).*$").unwrap());
    remaining = noise.replace(&remaining, "").trim_end_matches([' ', '-']).to_string();

    result.title = Some(remaining.trim().to_string()).filter(|t| !t.is_empty());

    if result.title.is_none() || result.year.is_none() {
        let (dir_title, dir_year) = show_hint_from_dirs(full_path);
        if result.title.is_none() {
            result.title = dir_title;
        }
        if result.year.is_none() {
            result.year = dir_year;
        }
    }

    result
}

fn parse_music(filename: &str, full_path: &Path) -> ParsedName {
    let mut result = ParsedName::default();
    let normalized = normalize_whitespace(filename);

    static TRACK: OnceLock<Regex> = OnceLock::new();
    let track_re = TRACK.get_or_init(|| Regex::new(r"(?i)^(?:Track\s*)?(\d{1,2})").unwrap());

    if let Some(caps) = track_re.captures(&normalized) {
        result.track = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let after = normalized[caps.get(0).unwrap().end()..].trim_start_matches([' ', '-']);
        if !after.is_empty() {
            result.title = Some(after.to_string());
        }
    } else {
        result.title = Some(normalized.clone());
    }

    // Artist/Album (Year)/Track## - Title.ext directory shape
    let components: Vec<String> = full_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if components.len() >= 3 {
        result.artist = Some(components[components.len() - 3].clone());
        let album_part = &components[components.len() - 2];
        if let Some(caps) = dir_year_re().captures(album_part) {
            result.album = caps.get(1).map(|m| m.as_str().trim().to_string());
            result.year = caps.get(2).and_then(|m| m.as_str().parse().ok());
        } else {
            result.album = Some(album_part.clone());
        }
    }

    result
}

/// Parse one file path for the declared media type.
pub fn parse_filename(path: &Path, media_type: MediaType, anthology: bool) -> ParsedName {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    match media_type {
        MediaType::Tv => parse_tv(&stem, path, anthology),
        MediaType::Movie => parse_movie(&stem, path),
        MediaType::Music => parse_music(&stem, path),
    }
}
