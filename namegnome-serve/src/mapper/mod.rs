//! Deterministic mapper: scanned files to provider-backed rename candidates
//!
//! Resolves each `MediaFile` to a canonical entity (decision-pinned or
//! uniquely searched), then maps content per media type: episode numbers
//! for TV, `(title, year)` for movies, artist/album/track for music.
//! Anthology-candidate TV files are forwarded to the anthology resolver,
//! with the LLM assist invoked only on residual ambiguity.

pub mod titlematch;

use crate::anthology::llm::{self, AssistRequest, GroupingAssist};
use crate::anthology::{self, CanonicalEpisode};
use crate::providers::gateway::ProviderGateway;
use crate::providers::{ProviderError, SearchCandidate};
use namegnome_common::db::decisions;
use namegnome_common::naming;
use namegnome_common::types::{
    DisambigCandidate, EpisodeDst, EpisodeSegment, MediaFile, MediaType, MovieDst, Origin,
    SourceRef, TrackDst,
};
use sqlx::SqlitePool;
use std::path::PathBuf;

pub const WARN_NEEDS_REVIEW: &str = "needs_review";
pub const WARN_PROVIDER_UNAVAILABLE: &str = "provider_unavailable";
pub const WARN_EPISODE_NOT_FOUND: &str = "episode_not_found";
pub const WARN_TRACK_NOT_FOUND: &str = "track_not_found";
pub const WARN_ALBUM_NOT_FOUND: &str = "album_not_found";
pub const WARN_YEAR_MISSING: &str = "year_missing";
pub const WARN_YEAR_MISMATCH: &str = "year_mismatch";

/// One rename candidate produced by a mapping pass.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub origin: Origin,
    pub confidence: f64,
    pub src_path: PathBuf,
    pub segment: Option<EpisodeSegment>,
    pub dst_path: PathBuf,
    pub episode: Option<EpisodeDst>,
    pub movie: Option<MovieDst>,
    pub track: Option<TrackDst>,
    pub sources: Vec<SourceRef>,
    pub warnings: Vec<String>,
    pub anthology: bool,
    pub explain: Option<String>,
}

/// Result of mapping one file.
#[derive(Debug)]
pub enum MapOutcome {
    /// Deterministic (and possibly LLM) candidates for this file
    Mapped(Vec<Candidate>),
    /// Entity resolution was ambiguous; the ledger mints a token upstream
    Ambiguous {
        field: String,
        candidates: Vec<DisambigCandidate>,
        suggested: Option<String>,
    },
}

/// Pinned entity after resolution.
#[derive(Debug, Clone)]
struct PinnedEntity {
    provider: String,
    ext_id: String,
    title: String,
    year: Option<i32>,
    /// Pin came from a persisted decision, not a fresh search
    from_decision: bool,
}

pub struct DeterministicMapper<'a> {
    pool: &'a SqlitePool,
    gateway: &'a ProviderGateway,
}

impl<'a> DeterministicMapper<'a> {
    pub fn new(pool: &'a SqlitePool, gateway: &'a ProviderGateway) -> Self {
        Self { pool, gateway }
    }

    /// Map one file. Anthology-candidate TV files consult `assist` when
    /// the deterministic pass punts.
    pub async fn map_file(
        &self,
        file: &MediaFile,
        assist: Option<&dyn GroupingAssist>,
    ) -> namegnome_common::Result<MapOutcome> {
        match file.media_type {
            MediaType::Tv => self.map_tv(file, assist).await,
            MediaType::Movie => self.map_movie(file).await,
            MediaType::Music => self.map_music(file).await,
        }
    }

    /// Resolve `(title, year?)` to a single provider entity.
    async fn resolve_entity(
        &self,
        media_type: MediaType,
        title: &str,
        year: Option<i32>,
    ) -> namegnome_common::Result<Resolution> {
        let title_norm = naming::normalize_title(title);
        let scope = media_type.as_str();

        if let Some(decision) =
            decisions::get_decision(self.pool, scope, &title_norm, year).await?
        {
            tracing::debug!(
                "Decision pin for '{}' ({:?}): {}/{}",
                title_norm,
                year,
                decision.provider,
                decision.ext_id
            );
            match self
                .gateway
                .fetch_entity(&decision.provider, media_type, &decision.ext_id)
                .await
            {
                Ok(entity) => {
                    return Ok(Resolution::Pinned(PinnedEntity {
                        provider: entity.provider,
                        ext_id: entity.ext_id,
                        title: entity.title,
                        year: entity.year,
                        from_decision: true,
                    }))
                }
                Err(ProviderError::Offline) => return Ok(Resolution::Unavailable { offline: true }),
                Err(e) => {
                    tracing::warn!("Pinned entity fetch failed: {}", e);
                    return Ok(Resolution::Unavailable { offline: false });
                }
            }
        }

        let candidates = match self.gateway.search(media_type, title, year).await {
            Ok(candidates) => candidates,
            Err(ProviderError::Offline) => return Ok(Resolution::Unavailable { offline: true }),
            Err(e) => {
                tracing::warn!("Entity search failed for '{}': {}", title_norm, e);
                return Ok(Resolution::Unavailable { offline: false });
            }
        };

        Ok(Self::select_candidate(&title_norm, year, candidates))
    }

    /// Pin when unique after year/title filtering; otherwise raise
    /// disambiguation with the plausible set.
    fn select_candidate(
        title_norm: &str,
        year: Option<i32>,
        mut candidates: Vec<SearchCandidate>,
    ) -> Resolution {
        if candidates.is_empty() {
            return Resolution::NoMatch;
        }

        if let Some(year) = year {
            let by_year: Vec<_> = candidates
                .iter()
                .filter(|c| c.year == Some(year))
                .cloned()
                .collect();
            if !by_year.is_empty() {
                candidates = by_year;
            }
        }

        let exact: Vec<_> = candidates
            .iter()
            .filter(|c| naming::normalize_title(&c.title) == title_norm)
            .cloned()
            .collect();
        let plausible = if exact.is_empty() { candidates } else { exact };

        if plausible.len() == 1 {
            let chosen = &plausible[0];
            return Resolution::Pinned(PinnedEntity {
                provider: chosen.provider.clone(),
                ext_id: chosen.ext_id.clone(),
                title: chosen.title.clone(),
                year: chosen.year,
                from_decision: false,
            });
        }

        let suggested = plausible.first().map(|c| c.ext_id.clone());
        Resolution::Ambiguous {
            candidates: plausible
                .into_iter()
                .map(|c| DisambigCandidate {
                    provider: c.provider,
                    id: c.ext_id,
                    title: c.title,
                    year: c.year,
                })
                .collect(),
            suggested,
        }
    }

    async fn map_tv(
        &self,
        file: &MediaFile,
        assist: Option<&dyn GroupingAssist>,
    ) -> namegnome_common::Result<MapOutcome> {
        let Some(title) = file.parsed_title.as_deref() else {
            return Ok(MapOutcome::Mapped(vec![needs_review_candidate(
                file,
                "filename yielded no show title",
            )]));
        };

        let entity = match self
            .resolve_entity(MediaType::Tv, title, file.parsed_year)
            .await?
        {
            Resolution::Pinned(entity) => entity,
            Resolution::Ambiguous {
                candidates,
                suggested,
            } => {
                return Ok(MapOutcome::Ambiguous {
                    field: "title".into(),
                    candidates,
                    suggested,
                })
            }
            Resolution::Unavailable { .. } | Resolution::NoMatch => {
                return Ok(MapOutcome::Mapped(vec![needs_review_candidate(
                    file,
                    "show could not be resolved against any provider",
                )]));
            }
        };

        let Some(season) = file.parsed_season else {
            return Ok(MapOutcome::Mapped(vec![needs_review_candidate(
                file,
                "no season number parsed",
            )]));
        };

        let episodes = match self
            .gateway
            .episodes(&entity.provider, &entity.ext_id, Some(season))
            .await
        {
            Ok(episodes) => episodes,
            Err(_) => {
                return Ok(MapOutcome::Mapped(vec![needs_review_candidate(
                    file,
                    "episode list unavailable",
                )]));
            }
        };

        if file.anthology_candidate && !file.segments.is_empty() {
            return self
                .map_tv_anthology(file, &entity, season, &episodes, assist)
                .await;
        }

        let Some(episode_start) = file.parsed_episode else {
            return Ok(MapOutcome::Mapped(vec![needs_review_candidate(
                file,
                "no episode number parsed",
            )]));
        };
        let episode_end = file.parsed_episode_end.unwrap_or(episode_start);

        let ext = extension_of(&file.path);
        let mut titles = Vec::new();
        let mut warnings = Vec::new();
        for number in episode_start..=episode_end {
            match episodes.iter().find(|e| e.episode == number) {
                Some(episode) => titles.push(episode.title.clone()),
                None => {
                    warnings.push(WARN_EPISODE_NOT_FOUND.to_string());
                }
            }
        }

        let confidence = if warnings.is_empty() { 1.0 } else { 0.5 };
        if !warnings.is_empty() {
            warnings.push(WARN_NEEDS_REVIEW.to_string());
            if titles.is_empty() {
                if let Some(parsed) = &file.parsed_episode_title {
                    titles.push(parsed.clone());
                }
            }
        }

        let dst_path = naming::tv_path(
            &entity.title,
            entity.year,
            season,
            episode_start,
            episode_end,
            &titles,
            &ext,
        );

        Ok(MapOutcome::Mapped(vec![Candidate {
            origin: Origin::Deterministic,
            confidence,
            src_path: file.path.clone(),
            segment: None,
            dst_path,
            episode: Some(EpisodeDst {
                season,
                episode_start,
                episode_end,
                titles: titles.clone(),
            }),
            movie: None,
            track: None,
            sources: vec![SourceRef {
                provider: entity.provider.clone(),
                id: entity.ext_id.clone(),
                entity_type: "episode".into(),
            }],
            warnings,
            anthology: false,
            explain: Some(format!(
                "matched S{:02}E{:02} against {} episode list",
                season, episode_start, entity.provider
            )),
        }]))
    }

    async fn map_tv_anthology(
        &self,
        file: &MediaFile,
        entity: &PinnedEntity,
        season: i32,
        episodes: &[namegnome_common::db::entities::EpisodeRecord],
        assist: Option<&dyn GroupingAssist>,
    ) -> namegnome_common::Result<MapOutcome> {
        let canonical = CanonicalEpisode::from_records(episodes);
        let resolution = anthology::resolve_intervals(&file.segments, &canonical);

        let mut candidates = candidates_from_groups(
            file,
            entity,
            season,
            &resolution.groups,
            Origin::Deterministic,
            resolution.confidence,
            &resolution.warnings,
        );

        if resolution.needs_assist {
            if let Some(assist) = assist {
                let request = AssistRequest::new(season, &file.segments, &resolution, &canonical);
                match assist.regroup(&request).await {
                    Ok(grouping) => {
                        let llm_groups = llm::grouping_to_groups(&grouping);
                        for (index, group) in llm_groups.iter().enumerate() {
                            let confidence = grouping
                                .groups
                                .get(index)
                                .map(|g| g.confidence)
                                .unwrap_or(0.5);
                            candidates.extend(candidates_from_groups(
                                file,
                                entity,
                                season,
                                std::slice::from_ref(group),
                                Origin::Llm,
                                confidence,
                                &[],
                            ));
                        }
                    }
                    Err(e) => {
                        tracing::warn!("LLM assist rejected: {}", e);
                        for candidate in &mut candidates {
                            candidate
                                .warnings
                                .push(llm::WARN_LLM_UNAVAILABLE.to_string());
                        }
                    }
                }
            }
        }

        Ok(MapOutcome::Mapped(candidates))
    }

    async fn map_movie(&self, file: &MediaFile) -> namegnome_common::Result<MapOutcome> {
        let Some(title) = file.parsed_title.as_deref() else {
            return Ok(MapOutcome::Mapped(vec![needs_review_candidate(
                file,
                "filename yielded no movie title",
            )]));
        };

        let entity = match self
            .resolve_entity(MediaType::Movie, title, file.parsed_year)
            .await?
        {
            Resolution::Pinned(entity) => entity,
            Resolution::Ambiguous {
                candidates,
                suggested,
            } => {
                return Ok(MapOutcome::Ambiguous {
                    field: "title".into(),
                    candidates,
                    suggested,
                })
            }
            Resolution::Unavailable { .. } | Resolution::NoMatch => {
                return Ok(MapOutcome::Mapped(vec![needs_review_candidate(
                    file,
                    "movie could not be resolved against any provider",
                )]));
            }
        };

        // A filename year that disagrees with the resolved entity is never
        // silently accepted; the caller must confirm the match.
        if !entity.from_decision {
            if let (Some(parsed), Some(actual)) = (file.parsed_year, entity.year) {
                if parsed != actual {
                    return Ok(MapOutcome::Ambiguous {
                        field: "year".into(),
                        candidates: vec![DisambigCandidate {
                            provider: entity.provider.clone(),
                            id: entity.ext_id.clone(),
                            title: entity.title.clone(),
                            year: entity.year,
                        }],
                        suggested: Some(entity.ext_id.clone()),
                    });
                }
            }
        }

        let Some(year) = entity.year.or(file.parsed_year) else {
            let mut candidate = needs_review_candidate(file, "no release year available");
            candidate.warnings.push(WARN_YEAR_MISSING.to_string());
            return Ok(MapOutcome::Mapped(vec![candidate]));
        };

        // Exact (title, year) match is certain; a missing year costs a
        // step of confidence; a decision-confirmed year mismatch stays
        // below the high bucket.
        let mut warnings = Vec::new();
        let confidence = match (file.parsed_year, entity.year) {
            (Some(parsed), Some(actual)) if parsed == actual => 1.0,
            (Some(_), Some(_)) => {
                warnings.push(WARN_YEAR_MISMATCH.to_string());
                0.8
            }
            _ => 0.9,
        };

        let ext = extension_of(&file.path);
        Ok(MapOutcome::Mapped(vec![Candidate {
            origin: Origin::Deterministic,
            confidence,
            src_path: file.path.clone(),
            segment: None,
            dst_path: naming::movie_path(&entity.title, year, &ext),
            episode: None,
            movie: Some(MovieDst {
                title: entity.title.clone(),
                year,
            }),
            track: None,
            sources: vec![SourceRef {
                provider: entity.provider.clone(),
                id: entity.ext_id.clone(),
                entity_type: "movie".into(),
            }],
            warnings,
            anthology: false,
            explain: Some(format!(
                "matched '{}' ({}) via {}",
                entity.title, year, entity.provider
            )),
        }]))
    }

    async fn map_music(&self, file: &MediaFile) -> namegnome_common::Result<MapOutcome> {
        let (Some(artist_name), Some(track_number)) =
            (file.parsed_artist.as_deref(), file.parsed_track)
        else {
            return Ok(MapOutcome::Mapped(vec![needs_review_candidate(
                file,
                "artist or track number missing from path",
            )]));
        };

        let artist = match self
            .resolve_entity(MediaType::Music, artist_name, None)
            .await?
        {
            Resolution::Pinned(entity) => entity,
            Resolution::Ambiguous {
                candidates,
                suggested,
            } => {
                return Ok(MapOutcome::Ambiguous {
                    field: "artist".into(),
                    candidates,
                    suggested,
                })
            }
            Resolution::Unavailable { .. } | Resolution::NoMatch => {
                return Ok(MapOutcome::Mapped(vec![needs_review_candidate(
                    file,
                    "artist could not be resolved",
                )]));
            }
        };

        let albums = match self.gateway.albums(&artist.provider, &artist.ext_id).await {
            Ok(albums) => albums,
            Err(_) => {
                return Ok(MapOutcome::Mapped(vec![needs_review_candidate(
                    file,
                    "album list unavailable",
                )]));
            }
        };

        let album_norm = file
            .parsed_album
            .as_deref()
            .map(naming::normalize_title)
            .unwrap_or_default();
        let mut confidence: f64 = 1.0;

        let album = albums
            .iter()
            .find(|a| {
                a.title_norm == album_norm
                    && (file.parsed_year.is_none() || a.year == file.parsed_year)
            })
            .or_else(|| {
                confidence = 0.9;
                albums.iter().find(|a| a.title_norm == album_norm)
            });

        let Some(album) = album else {
            let mut candidate = needs_review_candidate(file, "album not found for artist");
            candidate.warnings.push(WARN_ALBUM_NOT_FOUND.to_string());
            return Ok(MapOutcome::Mapped(vec![candidate]));
        };

        let tracks = match self.gateway.tracks(&album.provider, &album.ext_id).await {
            Ok(tracks) => tracks,
            Err(_) => {
                return Ok(MapOutcome::Mapped(vec![needs_review_candidate(
                    file,
                    "track list unavailable",
                )]));
            }
        };

        let Some(track) = tracks.iter().find(|t| t.track == track_number) else {
            let mut candidate = needs_review_candidate(file, "track number not on album");
            candidate.warnings.push(WARN_TRACK_NOT_FOUND.to_string());
            return Ok(MapOutcome::Mapped(vec![candidate]));
        };

        let ext = extension_of(&file.path);
        Ok(MapOutcome::Mapped(vec![Candidate {
            origin: Origin::Deterministic,
            confidence,
            src_path: file.path.clone(),
            segment: None,
            dst_path: naming::music_path(
                &artist.title,
                &album.title,
                album.year,
                track.track,
                &track.title,
                &ext,
            ),
            episode: None,
            movie: None,
            track: Some(TrackDst {
                artist: artist.title.clone(),
                album: album.title.clone(),
                disc: track.disc,
                track: track.track,
                title: track.title.clone(),
            }),
            sources: vec![SourceRef {
                provider: artist.provider.clone(),
                id: album.ext_id.clone(),
                entity_type: "track".into(),
            }],
            warnings: Vec::new(),
            anthology: false,
            explain: Some(format!(
                "resolved {} / {} / track {:02}",
                artist.title, album.title, track.track
            )),
        }]))
    }
}

#[derive(Debug)]
enum Resolution {
    Pinned(PinnedEntity),
    Ambiguous {
        candidates: Vec<DisambigCandidate>,
        suggested: Option<String>,
    },
    Unavailable {
        #[allow(dead_code)]
        offline: bool,
    },
    NoMatch,
}

fn extension_of(path: &std::path::Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "mkv".to_string())
}

/// Placeholder item for files the pipeline cannot place yet: destination
/// equals source so an apply never moves them.
fn needs_review_candidate(file: &MediaFile, reason: &str) -> Candidate {
    Candidate {
        origin: Origin::Deterministic,
        confidence: 0.2,
        src_path: file.path.clone(),
        segment: None,
        dst_path: file.path.clone(),
        episode: None,
        movie: None,
        track: None,
        sources: Vec::new(),
        warnings: vec![
            WARN_NEEDS_REVIEW.to_string(),
            WARN_PROVIDER_UNAVAILABLE.to_string(),
        ],
        anthology: file.anthology_candidate,
        explain: Some(reason.to_string()),
    }
}

fn candidates_from_groups(
    file: &MediaFile,
    entity: &PinnedEntity,
    season: i32,
    groups: &[anthology::ResolvedGroup],
    origin: Origin,
    confidence: f64,
    warnings: &[String],
) -> Vec<Candidate> {
    let ext = extension_of(&file.path);
    groups
        .iter()
        .map(|group| Candidate {
            origin,
            confidence,
            src_path: file.path.clone(),
            segment: Some(EpisodeSegment::new(
                Some(group.start),
                Some(group.end),
                Vec::new(),
            )),
            dst_path: naming::tv_path(
                &entity.title,
                entity.year,
                season,
                group.start,
                group.end,
                &group.titles,
                &ext,
            ),
            episode: Some(EpisodeDst {
                season,
                episode_start: group.start,
                episode_end: group.end,
                titles: group.titles.clone(),
            }),
            movie: None,
            track: None,
            sources: vec![SourceRef {
                provider: entity.provider.clone(),
                id: entity.ext_id.clone(),
                entity_type: "episode".into(),
            }],
            warnings: warnings.to_vec(),
            anthology: true,
            explain: None,
        })
        .collect()
}
