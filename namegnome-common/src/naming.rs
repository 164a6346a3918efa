//! Target path naming grammar and string normalisation
//!
//! Builds destination paths for the three media layouts:
//! - TV: `Show (Year)/Season SS/Show - SssEee[-Eee] - Title [& Title].ext`
//! - Movie: `Title (Year)/Title (Year).ext`
//! - Music: `Artist/Album (Year)/TrackNN - Title.ext`
//!
//! All emitted components are NFC-normalised and stripped of reserved
//! filesystem characters.

use std::cmp::Ordering;
use std::path::PathBuf;
use unicode_normalization::UnicodeNormalization;

/// Characters that never appear in an emitted path component.
const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// NFC-normalise and strip reserved characters from a path component.
///
/// Collapses runs of whitespace left behind by stripping.
pub fn sanitize_component(raw: &str) -> String {
    let nfc: String = raw.nfc().collect();
    let cleaned: String = nfc
        .chars()
        .map(|c| if RESERVED.contains(&c) || c.is_control() { ' ' } else { c })
        .collect();
    let mut out = String::with_capacity(cleaned.len());
    let mut last_space = true;
    for c in cleaned.chars() {
        if c == ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out.trim().to_string()
}

/// Normalise a title for lookup keys: NFC, lowercase, punctuation stripped,
/// whitespace collapsed.
pub fn normalize_title(raw: &str) -> String {
    let nfc: String = raw.nfc().collect();
    let mut out = String::with_capacity(nfc.len());
    let mut last_space = true;
    for c in nfc.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Directory+file path for a TV episode (or contiguous episode range).
pub fn tv_path(
    show: &str,
    year: Option<i32>,
    season: i32,
    episode_start: i32,
    episode_end: i32,
    titles: &[String],
    ext: &str,
) -> PathBuf {
    let show = sanitize_component(show);
    let show_dir = match year {
        Some(y) => format!("{} ({})", show, y),
        None => show.clone(),
    };
    let span = if episode_end > episode_start {
        format!("S{:02}E{:02}-E{:02}", season, episode_start, episode_end)
    } else {
        format!("S{:02}E{:02}", season, episode_start)
    };
    let title_part = titles
        .iter()
        .map(|t| sanitize_component(t))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" & ");
    let file = if title_part.is_empty() {
        format!("{} - {}.{}", show, span, ext)
    } else {
        format!("{} - {} - {}.{}", show, span, title_part, ext)
    };
    PathBuf::from(show_dir)
        .join(format!("Season {:02}", season))
        .join(file)
}

/// Directory+file path for a movie. Year is mandatory in this layout.
pub fn movie_path(title: &str, year: i32, ext: &str) -> PathBuf {
    let title = sanitize_component(title);
    let dir = format!("{} ({})", title, year);
    PathBuf::from(&dir).join(format!("{}.{}", dir, ext))
}

/// Directory+file path for a music track.
pub fn music_path(
    artist: &str,
    album: &str,
    year: Option<i32>,
    track: i32,
    title: &str,
    ext: &str,
) -> PathBuf {
    let artist = sanitize_component(artist);
    let album = sanitize_component(album);
    let album_dir = match year {
        Some(y) => format!("{} ({})", album, y),
        None => album,
    };
    PathBuf::from(artist).join(album_dir).join(format!(
        "Track{:02} - {}.{}",
        track,
        sanitize_component(title),
        ext
    ))
}

/// Natural, case-insensitive string comparison: embedded numeric runs are
/// ordered numerically, so "S2" < "S10".
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let (mut i, mut j) = (0usize, 0usize);

    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let ni = consume_number(&a, &mut i);
            let nj = consume_number(&b, &mut j);
            match ni.cmp(&nj) {
                Ordering::Equal => {}
                other => return other,
            }
        } else {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                other => return other,
            }
        }
    }
    a.len().cmp(&b.len()).then(Ordering::Equal)
}

fn consume_number(chars: &[char], idx: &mut usize) -> u64 {
    let mut value: u64 = 0;
    while *idx < chars.len() && chars[*idx].is_ascii_digit() {
        value = value
            .saturating_mul(10)
            .saturating_add(chars[*idx] as u64 - '0' as u64);
        *idx += 1;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_reserved() {
        assert_eq!(sanitize_component("What? A: Title*"), "What A Title");
        assert_eq!(sanitize_component("  spaced   out  "), "spaced out");
    }

    #[test]
    fn normalize_title_lowercases_and_strips_punct() {
        assert_eq!(normalize_title("Danger Mouse!"), "danger mouse");
        assert_eq!(normalize_title("Mighty Pups, Charged Up"), "mighty pups charged up");
    }

    #[test]
    fn normalize_title_applies_nfc() {
        // "é" as combining sequence vs precomposed
        let decomposed = "Cafe\u{0301}";
        let precomposed = "Caf\u{e9}";
        assert_eq!(normalize_title(decomposed), normalize_title(precomposed));
    }

    #[test]
    fn tv_path_single_episode() {
        let p = tv_path(
            "Danger Mouse 2015",
            Some(2015),
            1,
            1,
            1,
            &["Danger Mouse Begins Again".to_string()],
            "mp4",
        );
        assert_eq!(
            p,
            PathBuf::from("Danger Mouse 2015 (2015)/Season 01/Danger Mouse 2015 - S01E01 - Danger Mouse Begins Again.mp4")
        );
    }

    #[test]
    fn tv_path_episode_range_with_two_titles() {
        let p = tv_path(
            "Firebuds",
            Some(2022),
            1,
            1,
            2,
            &["Car In A Tree".to_string(), "Dalmatian Day".to_string()],
            "mp4",
        );
        assert_eq!(
            p,
            PathBuf::from(
                "Firebuds (2022)/Season 01/Firebuds - S01E01-E02 - Car In A Tree & Dalmatian Day.mp4"
            )
        );
    }

    #[test]
    fn movie_path_includes_year_twice() {
        let p = movie_path("The Matrix", 1999, "mkv");
        assert_eq!(p, PathBuf::from("The Matrix (1999)/The Matrix (1999).mkv"));
    }

    #[test]
    fn music_path_zero_pads_track() {
        let p = music_path("Artist", "Album", Some(2001), 3, "Song", "flac");
        assert_eq!(p, PathBuf::from("Artist/Album (2001)/Track03 - Song.flac"));
    }

    #[test]
    fn natural_cmp_orders_numeric_runs() {
        assert_eq!(natural_cmp("S2", "S10"), Ordering::Less);
        assert_eq!(natural_cmp("S2", "s02"), Ordering::Less); // same number, shorter form first
        assert_eq!(natural_cmp("abc", "ABD"), Ordering::Less);
        assert_eq!(natural_cmp("file10", "file10"), Ordering::Equal);
    }
}
