//! Media file scanner
//!
//! Two-phase discovery: sequential directory traversal with symlink-loop
//! detection, then parallel per-file stat/parse/hash work. Produces a
//! `ScanResult` whose fingerprint binds later plans to the exact
//! filesystem state observed.

pub mod parser;

use namegnome_common::types::{MediaFile, MediaType, ScanResult};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

/// Scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("File access error {0}: {1}")]
    FileAccess(PathBuf, String),
}

const TV_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "ts", "mpg", "mpeg", "wmv", "flv", "webm",
];
const MOVIE_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "iso", "img", "mpg", "mpeg", "wmv", "flv", "webm", "ts",
];
const MUSIC_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "aac", "ogg", "opus", "wav", "wma", "ape",
];

const IGNORE_PATTERNS: &[&str] = &[".DS_Store", "Thumbs.db", ".git", ".namegnome"];

/// Scan options.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Compute SHA-256 content hashes (slow on large libraries)
    pub with_hash: bool,
    /// Emit anthology segments for TV files
    pub anthology: bool,
}

/// Media file scanner for one declared media type.
pub struct MediaScanner {
    media_type: MediaType,
    options: ScanOptions,
}

impl MediaScanner {
    pub fn new(media_type: MediaType, options: ScanOptions) -> Self {
        Self {
            media_type,
            options,
        }
    }

    fn extensions(&self) -> &'static [&'static str] {
        match self.media_type {
            MediaType::Tv => TV_EXTENSIONS,
            MediaType::Movie => MOVIE_EXTENSIONS,
            MediaType::Music => MUSIC_EXTENSIONS,
        }
    }

    /// Scan a root directory for media files.
    pub fn scan(&self, root_path: &Path) -> Result<ScanResult, ScanError> {
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }
        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }

        // Phase 1: sequential traversal, symlink-loop safe
        let mut candidates = Vec::new();
        let mut symlink_visited = HashSet::new();

        let walker = WalkDir::new(root_path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| should_process_entry(e, &mut symlink_visited));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.has_media_extension(entry.path()) {
                        candidates.push(entry.path().to_path_buf());
                    }
                }
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                }
            }
        }

        // Deterministic ordering regardless of walk order
        candidates.sort();

        tracing::debug!(
            "Scan phase 1: {} candidate files under {}",
            candidates.len(),
            root_path.display()
        );

        // Phase 2: parallel stat + parse (+ hash)
        let media_type = self.media_type;
        let options = self.options.clone();
        let mut files: Vec<MediaFile> = candidates
            .par_iter()
            .filter_map(|path| match build_media_file(path, media_type, &options) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!("Skipping unreadable file: {}", e);
                    None
                }
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let total_size = files.iter().map(|f| f.size).sum();
        let source_fingerprint = fingerprint(&files);

        Ok(ScanResult {
            scan_id: format!("scn_{}", Uuid::new_v4().simple()),
            root_path: root_path.to_path_buf(),
            media_type,
            file_count: files.len(),
            files,
            total_size,
            source_fingerprint,
        })
    }

    fn has_media_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                self.extensions().contains(&ext.as_str())
            })
            .unwrap_or(false)
    }
}

fn should_process_entry(entry: &DirEntry, symlink_visited: &mut HashSet<PathBuf>) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    for pattern in IGNORE_PATTERNS {
        if file_name.contains(pattern) {
            return false;
        }
    }

    if entry.file_type().is_symlink() {
        if let Ok(canonical) = entry.path().canonicalize() {
            if !symlink_visited.insert(canonical) {
                tracing::warn!("Symlink loop detected: {}", entry.path().display());
                return false;
            }
        }
    }

    true
}

fn build_media_file(
    path: &Path,
    media_type: MediaType,
    options: &ScanOptions,
) -> Result<MediaFile, ScanError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ScanError::FileAccess(path.to_path_buf(), e.to_string()))?;

    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let hash = if options.with_hash {
        let contents = std::fs::read(path)
            .map_err(|e| ScanError::FileAccess(path.to_path_buf(), e.to_string()))?;
        Some(format!("{:x}", Sha256::digest(&contents)))
    } else {
        None
    };

    let parsed = parser::parse_filename(path, media_type, options.anthology);

    let anthology_candidate = options.anthology
        && media_type == MediaType::Tv
        && (parsed.segments.len() > 1
            || parsed
                .segments
                .first()
                .map(|s| s.start != s.end || s.title_tokens.len() > 3)
                .unwrap_or(false));

    Ok(MediaFile {
        path: path.to_path_buf(),
        size: metadata.len(),
        mtime,
        hash,
        media_type,
        parsed_title: parsed.title,
        parsed_year: parsed.year,
        parsed_season: parsed.season,
        parsed_episode: parsed.episode,
        parsed_episode_end: parsed.episode_end,
        parsed_episode_title: parsed.episode_title,
        parsed_track: parsed.track,
        parsed_artist: parsed.artist,
        parsed_album: parsed.album,
        anthology_candidate,
        segments: parsed.segments,
    })
}

/// Deterministic scan fingerprint: SHA-256 over `path\n mtime\n` lines in
/// scan order.
pub fn fingerprint(files: &[MediaFile]) -> String {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.path.to_string_lossy().as_bytes());
        hasher.update(b"\n");
        hasher.update(file.mtime.to_string().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Recompute the fingerprint for a set of paths as they exist right now.
/// Missing files hash with mtime 0 so any removal also changes the digest.
pub fn fingerprint_paths(paths: &[PathBuf]) -> String {
    let mut hasher = Sha256::new();
    for path in paths {
        let mtime = std::fs::metadata(path)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(b"\n");
        hasher.update(mtime.to_string().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn scan_finds_only_matching_extensions() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Show/Season 01/Show - S01E01 - Pilot.mkv"));
        touch(&dir.path().join("Show/Season 01/notes.txt"));
        touch(&dir.path().join("Show/cover.jpg"));

        let scanner = MediaScanner::new(MediaType::Tv, ScanOptions::default());
        let result = scanner.scan(dir.path()).unwrap();
        assert_eq!(result.file_count, 1);
        assert_eq!(result.files[0].parsed_season, Some(1));
    }

    #[test]
    fn scan_nonexistent_path_errors() {
        let scanner = MediaScanner::new(MediaType::Tv, ScanOptions::default());
        let err = scanner.scan(Path::new("/nonexistent/nowhere")).unwrap_err();
        assert!(matches!(err, ScanError::PathNotFound(_)));
    }

    #[test]
    fn fingerprint_is_order_stable_and_mtime_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("A - S01E01.mkv"));
        touch(&dir.path().join("B - S01E02.mkv"));

        let scanner = MediaScanner::new(MediaType::Tv, ScanOptions::default());
        let first = scanner.scan(dir.path()).unwrap();
        let second = scanner.scan(dir.path()).unwrap();
        assert_eq!(first.source_fingerprint, second.source_fingerprint);

        // Rewriting one file moves its mtime eventually; force it instead
        let mut files = first.files.clone();
        files[0].mtime += 1;
        assert_ne!(fingerprint(&files), first.source_fingerprint);
    }

    #[test]
    fn scan_with_hash_fills_hashes() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Movie (2001).mkv"));

        let scanner = MediaScanner::new(
            MediaType::Movie,
            ScanOptions {
                with_hash: true,
                anthology: false,
            },
        );
        let result = scanner.scan(dir.path()).unwrap();
        assert!(result.files[0].hash.is_some());
    }

    #[test]
    fn anthology_flag_marks_candidates() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Firebuds-S01E01-Car In A Tree Dalmatian Day.mp4"));

        let scanner = MediaScanner::new(
            MediaType::Tv,
            ScanOptions {
                with_hash: false,
                anthology: true,
            },
        );
        let result = scanner.scan(dir.path()).unwrap();
        assert!(result.files[0].anthology_candidate);
        assert!(!result.files[0].segments.is_empty());
    }
}
