//! Per-track pipeline and playlist-level operations.
//!
//! Every source track goes through the same steps: result cache lookup (when
//! caching is enabled), matcher on a miss, cache write of the fresh
//! decision, and finally the override store. Overrides are applied last so
//! they correct cached and fresh decisions alike without ever being written
//! into the cache.

use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::catalog::{parse_catalog_ref, SourceCatalog, SourcePlaylist, TargetCatalog, TargetPlaylist};
use crate::error::{CatalogError, Result, TransferError};
use crate::matcher::{Matcher, ScoredCandidate};
use crate::models::{MatchDecision, RunSummary, TrackDescriptor, TrackOutcome, TrackResult};
use crate::overrides::OverrideStore;
use crate::progress::PhaseProgress;
use crate::retry::RetryPolicy;

/// Default name for a playlist built from liked tracks.
pub const LIKED_PLAYLIST_NAME: &str = "Liked Songs";

// ============================================================================
// Track Pipeline
// ============================================================================

/// Everything one track decision needs. Stores are passed in explicitly;
/// `cache` is `None` when caching is disabled for this run.
pub struct TrackPipeline<'a> {
    pub matcher: &'a Matcher,
    pub target: &'a dyn TargetCatalog,
    pub cache: Option<&'a Mutex<ResultCache>>,
    pub overrides: &'a OverrideStore,
}

impl<'a> TrackPipeline<'a> {
    /// Cached decision, re-judged against the current threshold.
    fn cached(&self, fingerprint: &str) -> Option<MatchDecision> {
        let cache = self.cache?;
        let guard = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get(fingerprint).map(|decision| self.matcher.rejudge(decision))
    }

    fn remember(&self, fingerprint: &str, decision: &MatchDecision) {
        if let Some(cache) = self.cache {
            let mut guard = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.put(fingerprint, decision.clone());
        }
    }

    /// Decide one track. Only a connection failure is returned as an error;
    /// everything else becomes an outcome in the summary.
    pub fn resolve_track(
        &self,
        position: usize,
        track: &TrackDescriptor,
    ) -> std::result::Result<TrackOutcome, CatalogError> {
        let label = track.label();
        if track.title.trim().is_empty() {
            warn!("skipping track #{} ({}): missing title", position + 1, track.source_id);
            return Ok(TrackOutcome {
                position,
                track: label,
                result: TrackResult::Skipped {
                    reason: "missing title".to_string(),
                },
            });
        }

        let fingerprint = track.fingerprint();
        let (decision, from_cache) = match self.cached(&fingerprint) {
            Some(decision) => (decision, true),
            None => match self.matcher.match_track(track, self.target) {
                Ok(decision) => {
                    self.remember(&fingerprint, &decision);
                    (decision, false)
                }
                Err(err @ CatalogError::Connect(_)) => return Err(err),
                Err(err) => {
                    warn!("no match for '{}': {}", label, err);
                    return Ok(TrackOutcome {
                        position,
                        track: label,
                        result: TrackResult::Failed {
                            error: err.to_string(),
                        },
                    });
                }
            },
        };

        Ok(TrackOutcome {
            position,
            track: label,
            result: TrackResult::Decided {
                decision: self.overrides.resolve(decision),
                from_cache,
            },
        })
    }

    /// Decide every track, in source order regardless of completion order.
    ///
    /// `workers <= 1` processes tracks one at a time; otherwise a bounded
    /// rayon pool runs catalog queries in parallel.
    pub fn resolve_all(&self, tracks: &[TrackDescriptor], workers: usize, phase: &str) -> Result<RunSummary> {
        let start = Instant::now();
        let progress = PhaseProgress::bar(phase, tracks.len() as u64);

        let step = |(position, track): (usize, &TrackDescriptor)| {
            let outcome = self.resolve_track(position, track);
            progress.tick();
            outcome
        };

        let outcomes: std::result::Result<Vec<TrackOutcome>, CatalogError> = if workers <= 1 {
            tracks.iter().enumerate().map(step).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| TransferError::validation(format!("cannot start {} workers: {}", workers, e)))?;
            pool.install(|| tracks.par_iter().enumerate().map(step).collect())
        };
        let outcomes = outcomes?;

        let mut summary = RunSummary::from_outcomes(outcomes);
        summary.elapsed_seconds = start.elapsed().as_secs_f64();
        progress.finish(format!(
            "{}: {}/{} matched",
            phase,
            summary.accepted + summary.overridden,
            summary.total
        ));
        Ok(summary)
    }
}

// ============================================================================
// Playlist Operations
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PlaylistOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    pub append_date: bool,
    pub public: bool,
    pub like: bool,
}

/// What happened to one target playlist.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistReport {
    pub playlist_id: String,
    pub name: String,
    pub added: usize,
    pub liked: usize,
    pub mutation_failures: usize,
    pub summary: RunSummary,
}

/// Diagnostics for a single track (the `search` operation).
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub track: TrackDescriptor,
    pub candidates: Vec<ScoredCandidate>,
    pub decision: MatchDecision,
    pub from_cache: bool,
}

pub struct Transfer<'a> {
    pub pipeline: TrackPipeline<'a>,
    pub source: &'a dyn SourceCatalog,
    pub retry: RetryPolicy,
    pub workers: usize,
}

impl<'a> Transfer<'a> {
    /// Create a target playlist from a source playlist.
    pub fn create(&self, playlist_ref: &str, opts: &PlaylistOptions) -> Result<PlaylistReport> {
        let id = parse_catalog_ref(playlist_ref)?;
        let playlist = self.source.playlist(&id)?;
        self.transfer_playlist(&playlist, opts)
    }

    /// Create a target playlist from the source library's liked tracks.
    pub fn liked(&self, opts: &PlaylistOptions) -> Result<PlaylistReport> {
        let playlist = SourcePlaylist {
            id: "liked".to_string(),
            name: LIKED_PLAYLIST_NAME.to_string(),
            tracks: self.source.list_liked_tracks()?,
            ..Default::default()
        };
        self.transfer_playlist(&playlist, opts)
    }

    /// Refill an existing target playlist, or append to it.
    pub fn update(&self, playlist_ref: &str, target_name: &str, append: bool) -> Result<PlaylistReport> {
        let id = parse_catalog_ref(playlist_ref)?;
        let existing = self
            .retry
            .run("find playlist", || self.pipeline.target.find_playlist(target_name))?
            .ok_or_else(|| CatalogError::NotFound(format!("target playlist '{}'", target_name)))?;
        let tracks = self.source.list_tracks(&id)?;

        let summary = self.match_tracks(&tracks, target_name)?;
        if !append {
            self.retry
                .run("clear playlist", || self.pipeline.target.clear_playlist(&existing.id))?;
        }
        self.fill_playlist(existing.id, existing.name, false, summary)
    }

    /// Transfer every public playlist owned by `user`.
    pub fn all(&self, user: &str, like: bool) -> Result<Vec<PlaylistReport>> {
        let playlists = self.source.list_user_playlists(user)?;
        let mut reports = Vec::new();
        for playlist in playlists.iter().filter(|p| p.public) {
            let opts = PlaylistOptions {
                like,
                public: true,
                ..Default::default()
            };
            reports.push(self.transfer_playlist(playlist, &opts)?);
        }
        info!("transferred {} public playlist(s) of {}", reports.len(), user);
        Ok(reports)
    }

    /// Show candidates, scores and the decision for one source track.
    pub fn search(&self, track_ref: &str) -> Result<SearchReport> {
        let id = parse_catalog_ref(track_ref)?;
        let track = self.source.track(&id)?;
        if track.title.trim().is_empty() {
            return Err(TransferError::Data(format!("track {} has no title", track.source_id)));
        }

        let matcher = self.pipeline.matcher;
        let mut candidates = matcher.score_all(&track, matcher.query(&track, self.pipeline.target)?);
        let fresh = matcher.decide(&track, &candidates);
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        let fingerprint = track.fingerprint();
        let cached = self.pipeline.cached(&fingerprint);
        let from_cache = cached.is_some();
        let decision = match cached {
            Some(decision) => decision,
            None => {
                self.pipeline.remember(&fingerprint, &fresh);
                fresh
            }
        };
        self.flush_cache()?;

        Ok(SearchReport {
            decision: self.pipeline.overrides.resolve(decision),
            track,
            candidates,
            from_cache,
        })
    }

    fn match_tracks(&self, tracks: &[TrackDescriptor], phase: &str) -> Result<RunSummary> {
        let summary = self.pipeline.resolve_all(tracks, self.workers, phase)?;
        // Persist decisions before touching the target playlist
        self.flush_cache()?;
        Ok(summary)
    }

    fn transfer_playlist(&self, playlist: &SourcePlaylist, opts: &PlaylistOptions) -> Result<PlaylistReport> {
        let mut name = opts.name.clone().unwrap_or_else(|| playlist.name.clone());
        if opts.append_date {
            name = format!("{} {}", name, chrono::Local::now().format("%Y-%m-%d"));
        }
        let description = opts
            .description
            .clone()
            .unwrap_or_else(|| playlist.description.clone());

        let summary = self.match_tracks(&playlist.tracks, &name)?;
        let playlist_id = self.retry.run("create playlist", || {
            self.pipeline.target.create_playlist(&name, &description, opts.public)
        })?;
        info!("created playlist '{}' ({})", name, playlist_id);
        self.fill_playlist(playlist_id, name, opts.like, summary)
    }

    fn fill_playlist(&self, playlist_id: String, name: String, like: bool, summary: RunSummary) -> Result<PlaylistReport> {
        let mut added = 0;
        let mut liked = 0;
        let mut mutation_failures = 0;
        for target_id in summary.accepted_targets() {
            match self
                .retry
                .run("add to playlist", || self.pipeline.target.add_to_playlist(&playlist_id, &target_id))
            {
                Ok(()) => added += 1,
                Err(err @ CatalogError::Connect(_)) => return Err(err.into()),
                Err(err) => {
                    warn!("cannot add {} to '{}': {}", target_id, name, err);
                    mutation_failures += 1;
                    continue;
                }
            }
            if like {
                match self.retry.run("like track", || self.pipeline.target.like_track(&target_id)) {
                    Ok(()) => liked += 1,
                    Err(err @ CatalogError::Connect(_)) => return Err(err.into()),
                    Err(err) => {
                        warn!("cannot like {}: {}", target_id, err);
                        mutation_failures += 1;
                    }
                }
            }
        }
        Ok(PlaylistReport {
            playlist_id,
            name,
            added,
            liked,
            mutation_failures,
            summary,
        })
    }

    fn flush_cache(&self) -> Result<()> {
        match self.pipeline.cache {
            Some(cache) => cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .flush(),
            None => Ok(()),
        }
    }
}

/// Delete every target playlist whose name matches `pattern`.
pub fn remove_playlists(
    target: &dyn TargetCatalog,
    retry: &RetryPolicy,
    pattern: &Regex,
) -> Result<Vec<TargetPlaylist>> {
    let matching: Vec<TargetPlaylist> = retry
        .run("list playlists", || target.list_playlists())?
        .into_iter()
        .filter(|p| pattern.is_match(&p.name))
        .collect();
    for playlist in &matching {
        retry.run("delete playlist", || target.delete_playlist(&playlist.id))?;
        info!("removed playlist '{}' ({})", playlist.name, playlist.id);
    }
    Ok(matching)
}
