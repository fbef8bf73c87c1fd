//! Confidence scoring between a source track and one target candidate.
//!
//! This module contains:
//! - Per-field string similarity (default and extended strategies)
//! - Multi-artist similarity
//! - Graduated duration closeness
//! - Weighted combination into a score in [0, 1]

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

use crate::error::{Result, TransferError};
use crate::models::{Candidate, TrackDescriptor};
use crate::normalize::{normalize, normalize_artist};

// ============================================================================
// Constants
// ============================================================================

/// Duration closeness when either side has no duration.
pub const UNKNOWN_DURATION_SCORE: f64 = 0.5;

/// Partial (substring) matches are worth slightly less than full matches.
pub const PARTIAL_RATIO_FACTOR: f64 = 0.9;

/// Token-set matches where one side has extra words.
pub const TOKEN_SUBSET_FACTOR: f64 = 0.95;

// ============================================================================
// Weights
// ============================================================================

/// Relative field weights. The combined score is divided by their total, so
/// they need not sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub title: f64,
    pub artist: f64,
    pub album: f64,
    pub duration: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            title: 0.5,
            artist: 0.3,
            album: 0.1,
            duration: 0.1,
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> f64 {
        self.title + self.artist + self.album + self.duration
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("title", self.title),
            ("artist", self.artist),
            ("album", self.album),
            ("duration", self.duration),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(TransferError::validation(format!(
                    "weight '{}' must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.total() <= 0.0 {
            return Err(TransferError::validation("scoring weights must not all be zero"));
        }
        Ok(())
    }

    /// Weighted mean of per-field similarities, clamped to [0, 1].
    pub fn combine(&self, fields: &FieldScores) -> f64 {
        let weighted = self.title * fields.title
            + self.artist * fields.artist
            + self.album * fields.album
            + self.duration * fields.duration;
        (weighted / self.total()).clamp(0.0, 1.0)
    }
}

/// Per-field similarities before weighting (kept for `search` diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldScores {
    pub title: f64,
    pub artist: f64,
    pub album: f64,
    pub duration: f64,
}

// ============================================================================
// String Similarity
// ============================================================================

/// Normalized Levenshtein similarity on already-normalized strings.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    normalized_levenshtein(a, b)
}

fn sorted_tokens(s: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens
}

/// Similarity after sorting words, so "beatles the" == "the beatles".
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    string_similarity(&sorted_tokens(a).join(" "), &sorted_tokens(b).join(" "))
}

/// Compares the shared words against each side's full word set.
/// One side being a word-subset of the other scores [`TOKEN_SUBSET_FACTOR`].
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let set_a: FxHashSet<&str> = a.split_whitespace().collect();
    let set_b: FxHashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    if set_a == set_b {
        return 1.0;
    }

    let mut common: Vec<&str> = set_a.intersection(&set_b).copied().collect();
    common.sort_unstable();
    let mut only_a: Vec<&str> = set_a.difference(&set_b).copied().collect();
    only_a.sort_unstable();
    let mut only_b: Vec<&str> = set_b.difference(&set_a).copied().collect();
    only_b.sort_unstable();

    let base = common.join(" ");
    let join = |extra: &[&str]| -> String {
        if base.is_empty() {
            extra.join(" ")
        } else if extra.is_empty() {
            base.clone()
        } else {
            format!("{} {}", base, extra.join(" "))
        }
    };
    let full_a = join(&only_a);
    let full_b = join(&only_b);

    let mut best = string_similarity(&full_a, &full_b);
    if !base.is_empty() {
        best = best
            .max(string_similarity(&base, &full_a))
            .max(string_similarity(&base, &full_b));
    }
    best * TOKEN_SUBSET_FACTOR
}

/// Best similarity of the shorter string against any equally long window of
/// the longer one. "song" vs "song live version" → 1.0.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = short.chars().count();
    if short_len == 0 {
        return 0.0;
    }

    let long_chars: Vec<char> = long.chars().collect();
    let mut best: f64 = 0.0;
    for start in 0..=(long_chars.len() - short_len) {
        let window: String = long_chars[start..start + short_len].iter().collect();
        best = best.max(string_similarity(short, &window));
        if best >= 1.0 {
            break;
        }
    }
    best
}

/// Compute similarity between two normalized artist names (0.0 to 1.0).
/// Uses Jaccard similarity on word tokens.
pub fn compute_artist_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let tokens_a: FxHashSet<&str> = a.split_whitespace().collect();
    let tokens_b: FxHashSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();

    intersection as f64 / union as f64
}

// ============================================================================
// Duration Scoring
// ============================================================================

/// Graduated duration closeness in [0, 1].
pub fn duration_closeness(source_sec: Option<u32>, candidate_sec: Option<u32>) -> f64 {
    let (Some(a), Some(b)) = (source_sec, candidate_sec) else {
        return UNKNOWN_DURATION_SCORE;
    };
    match a.abs_diff(b) {
        0..=2 => 1.0,
        3..=5 => 0.8,
        6..=10 => 0.5,
        11..=15 => 0.25,
        16..=30 => 0.1,
        _ => 0.0,
    }
}

// ============================================================================
// Scorers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoringMode {
    #[default]
    Default,
    /// Token-order-insensitive and partial-word matching on top of default.
    Extended,
}

/// Scores one candidate against a source track.
///
/// Implementations only differ in how two normalized strings are compared;
/// field extraction and weighting are shared.
pub trait Scorer: Send + Sync {
    fn mode(&self) -> ScoringMode;

    fn weights(&self) -> &ScoringWeights;

    /// Similarity of two normalized strings in [0, 1].
    fn text_similarity(&self, a: &str, b: &str) -> f64;

    fn artist_similarity(&self, source: &[String], candidate: &[String]) -> f64 {
        let source_norm: Vec<String> = source
            .iter()
            .map(|a| normalize_artist(a))
            .filter(|a| !a.is_empty())
            .collect();
        let candidate_norm: Vec<String> = candidate
            .iter()
            .map(|a| normalize_artist(a))
            .filter(|a| !a.is_empty())
            .collect();

        let mut best: f64 = 0.0;
        for s in &source_norm {
            for c in &candidate_norm {
                if s == c {
                    return 1.0;
                }
                let similarity = self
                    .text_similarity(s, c)
                    .max(compute_artist_similarity(s, c));
                best = best.max(similarity);
            }
        }
        best
    }

    fn field_scores(&self, source: &TrackDescriptor, candidate: &Candidate) -> FieldScores {
        let title = self.text_similarity(&normalize(&source.title), &normalize(&candidate.title));
        let artist = self.artist_similarity(&source.artists, &candidate.artists);
        let album = match (&source.album, &candidate.album) {
            (Some(a), Some(b)) => self.text_similarity(&normalize(a), &normalize(b)),
            _ => 0.0,
        };
        let duration = duration_closeness(source.duration, candidate.duration);
        FieldScores {
            title,
            artist,
            album,
            duration,
        }
    }

    fn score(&self, source: &TrackDescriptor, candidate: &Candidate) -> f64 {
        self.weights().combine(&self.field_scores(source, candidate))
    }
}

pub struct DefaultScorer {
    weights: ScoringWeights,
}

impl DefaultScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }
}

impl Scorer for DefaultScorer {
    fn mode(&self) -> ScoringMode {
        ScoringMode::Default
    }

    fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    fn text_similarity(&self, a: &str, b: &str) -> f64 {
        string_similarity(a, b)
    }
}

pub struct ExtendedScorer {
    weights: ScoringWeights,
}

impl ExtendedScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }
}

impl Scorer for ExtendedScorer {
    fn mode(&self) -> ScoringMode {
        ScoringMode::Extended
    }

    fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    // Max over a superset of the default comparison, so never lower than it.
    fn text_similarity(&self, a: &str, b: &str) -> f64 {
        string_similarity(a, b)
            .max(token_sort_ratio(a, b))
            .max(token_set_ratio(a, b))
            .max(PARTIAL_RATIO_FACTOR * partial_ratio(a, b))
    }
}

/// Pick the scoring strategy once per run.
pub fn scorer_for(mode: ScoringMode, weights: ScoringWeights) -> Box<dyn Scorer> {
    match mode {
        ScoringMode::Default => Box::new(DefaultScorer::new(weights)),
        ScoringMode::Extended => Box::new(ExtendedScorer::new(weights)),
    }
}

// ============================================================================
// Tests
// ============================================================================
