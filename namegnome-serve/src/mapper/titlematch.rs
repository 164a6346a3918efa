//! Normalised token scoring for episode title matching
//!
//! Scores token multisets case- and punctuation-insensitively, with
//! apostrophe variants collapsed and digit/word equivalence ("2" matches
//! "two"). Score is `|tokens(a) ∩ tokens(b)| / max(|tokens(a)|, |tokens(b)|)`.

use std::collections::BTreeSet;
use unicode_normalization::UnicodeNormalization;

/// Acceptance threshold for a segment-to-episode title match.
pub const THETA_MATCH: f64 = 0.67;
/// Stricter threshold for singleton collapse.
pub const THETA_SINGLE: f64 = 0.8;

const DIGIT_WORDS: &[(&str, &str)] = &[
    ("zero", "0"),
    ("one", "1"),
    ("two", "2"),
    ("three", "3"),
    ("four", "4"),
    ("five", "5"),
    ("six", "6"),
    ("seven", "7"),
    ("eight", "8"),
    ("nine", "9"),
    ("ten", "10"),
];

/// Canonicalise one token: NFC, lowercase, apostrophes dropped, number
/// words folded to digits.
fn canonical_token(raw: &str) -> String {
    let nfc: String = raw.nfc().collect();
    let lowered: String = nfc
        .chars()
        .filter(|c| *c != '\'' && *c != '\u{2019}')
        .flat_map(|c| c.to_lowercase())
        .filter(|c| c.is_alphanumeric())
        .collect();

    for (word, digit) in DIGIT_WORDS {
        if lowered == *word {
            return (*digit).to_string();
        }
    }
    lowered
}

/// Tokenise free text into canonical tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .map(canonical_token)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Canonicalise an already-tokenised word list.
pub fn canonicalize_tokens(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .map(|t| canonical_token(t))
        .filter(|t| !t.is_empty())
        .collect()
}

/// `|a ∩ b| / max(|a|, |b|)` over canonical token sets.
pub fn score(a: &[String], b: &[String]) -> f64 {
    let set_a: BTreeSet<&str> = a.iter().map(|s| s.as_str()).collect();
    let set_b: BTreeSet<&str> = b.iter().map(|s| s.as_str()).collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    intersection as f64 / set_a.len().max(set_b.len()) as f64
}

/// Coverage of `needle` inside `haystack`: `|needle ∩ haystack| / |needle|`.
///
/// Used when a segment's token blob spans several episode titles, so the
/// symmetric score would punish the extra tokens.
pub fn coverage(needle: &[String], haystack: &[String]) -> f64 {
    let needle_set: BTreeSet<&str> = needle.iter().map(|s| s.as_str()).collect();
    let hay_set: BTreeSet<&str> = haystack.iter().map(|s| s.as_str()).collect();
    if needle_set.is_empty() {
        return 0.0;
    }
    let covered = needle_set.intersection(&hay_set).count();
    covered as f64 / needle_set.len() as f64
}
