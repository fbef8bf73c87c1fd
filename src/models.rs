//! Core data models for playlist transfer.
//!
//! This module contains the track descriptors read from the source catalog,
//! candidates returned by the target catalog, match decisions, and the
//! per-run summary.

use serde::{Deserialize, Serialize};

use crate::normalize::{normalize, normalize_artist};

// ============================================================================
// Source / Target Tracks
// ============================================================================

/// Track read from the source catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: Option<String>,
    /// Seconds
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub source_id: String,
}

impl TrackDescriptor {
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists
            .iter()
            .map(|a| a.trim())
            .find(|a| !a.is_empty())
    }

    /// Query string sent to the target catalog: title plus primary artist.
    pub fn search_query(&self) -> String {
        match self.primary_artist() {
            Some(artist) => format!("{} {}", self.title.trim(), artist),
            None => self.title.trim().to_string(),
        }
    }

    /// Stable cache key. Prefers the source id; falls back to a normalized
    /// composite of title, artists and duration.
    pub fn fingerprint(&self) -> String {
        let id = self.source_id.trim();
        if !id.is_empty() {
            return format!("id:{}", id);
        }
        let artists: Vec<String> = self.artists.iter().map(|a| normalize_artist(a)).collect();
        let duration = self.duration.map(|d| d.to_string()).unwrap_or_default();
        format!("meta:{}|{}|{}", normalize(&self.title), artists.join(","), duration)
    }

    /// Human-readable label used in logs and reports.
    pub fn label(&self) -> String {
        if self.artists.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artists.join(", "), self.title)
        }
    }
}

/// Search result from the target catalog, in catalog order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub target_id: String,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
}

// ============================================================================
// Decisions
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchReason {
    Accepted,
    NoCandidates,
    BelowThreshold,
    Overridden,
}

impl MatchReason {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchReason::Accepted => "ACCEPTED",
            MatchReason::NoCandidates => "NO_CANDIDATES",
            MatchReason::BelowThreshold => "BELOW_THRESHOLD",
            MatchReason::Overridden => "OVERRIDDEN",
        }
    }
}

/// Outcome of matching one source track.
///
/// `target_id` is `None` only for `NO_CANDIDATES`. A `BELOW_THRESHOLD`
/// decision keeps the best candidate's id and score for diagnostics but is
/// never used for playlist mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchDecision {
    pub source_id: String,
    pub target_id: Option<String>,
    pub score: f64,
    pub accepted: bool,
    pub reason: MatchReason,
}

impl MatchDecision {
    pub fn no_candidates(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            target_id: None,
            score: 0.0,
            accepted: false,
            reason: MatchReason::NoCandidates,
        }
    }

    /// Target id to add to a playlist, if this decision is usable.
    pub fn accepted_target(&self) -> Option<&str> {
        if self.accepted {
            self.target_id.as_deref()
        } else {
            None
        }
    }
}

// ============================================================================
// Run Summary
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrackResult {
    Decided {
        decision: MatchDecision,
        from_cache: bool,
    },
    /// Catalog query failed after retries; treated like NO_CANDIDATES.
    Failed { error: String },
    /// Descriptor unusable (e.g. no title).
    Skipped { reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackOutcome {
    pub position: usize,
    pub track: String,
    #[serde(flatten)]
    pub result: TrackResult,
}

impl TrackOutcome {
    pub fn accepted_target(&self) -> Option<&str> {
        match &self.result {
            TrackResult::Decided { decision, .. } => decision.accepted_target(),
            _ => None,
        }
    }
}

/// Per-run counters and outcomes, in source playlist order.
#[derive(Default, Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub accepted: usize,
    pub overridden: usize,
    pub below_threshold: usize,
    pub no_candidates: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cache_hits: usize,
    pub elapsed_seconds: f64,
    pub outcomes: Vec<TrackOutcome>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: Vec<TrackOutcome>) -> Self {
        let mut summary = RunSummary {
            total: outcomes.len(),
            ..Default::default()
        };
        for outcome in &outcomes {
            match &outcome.result {
                TrackResult::Decided {
                    decision,
                    from_cache,
                } => {
                    if *from_cache {
                        summary.cache_hits += 1;
                    }
                    match decision.reason {
                        MatchReason::Accepted => summary.accepted += 1,
                        MatchReason::Overridden => summary.overridden += 1,
                        MatchReason::BelowThreshold => summary.below_threshold += 1,
                        MatchReason::NoCandidates => summary.no_candidates += 1,
                    }
                }
                TrackResult::Failed { .. } => summary.failed += 1,
                TrackResult::Skipped { .. } => summary.skipped += 1,
            }
        }
        summary.outcomes = outcomes;
        summary
    }

    /// Accepted target ids in source order, first occurrence only.
    pub fn accepted_targets(&self) -> Vec<String> {
        let mut seen = rustc_hash::FxHashSet::default();
        self.outcomes
            .iter()
            .filter_map(|o| o.accepted_target())
            .filter(|id| seen.insert(id.to_string()))
            .map(|id| id.to_string())
            .collect()
    }

    /// Calculate match rate as a percentage
    pub fn match_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * (self.accepted + self.overridden) as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str, artists: &[&str], duration: Option<u32>, id: &str) -> TrackDescriptor {
        TrackDescriptor {
            title: title.to_string(),
            artists: artists.iter().map(|a| a.to_string()).collect(),
            album: None,
            duration,
            source_id: id.to_string(),
        }
    }

    #[test]
    fn test_fingerprint_prefers_source_id() {
        let t = track("Let It Be", &["The Beatles"], Some(243), "abc123");
        assert_eq!(t.fingerprint(), "id:abc123");
    }

    #[test]
    fn test_fingerprint_falls_back_to_metadata() {
        let a = track("Let It Be (Remastered)", &["The Beatles"], Some(243), "  ");
        let b = track("let it be", &["Beatles"], Some(243), "");
        assert_eq!(a.fingerprint(), "meta:let it be|beatles|243");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_search_query_uses_primary_artist() {
        let t = track("Yesterday", &["", "The Beatles", "Other"], None, "x");
        assert_eq!(t.search_query(), "Yesterday The Beatles");
        let t = track("Yesterday", &[], None, "x");
        assert_eq!(t.search_query(), "Yesterday");
    }

    #[test]
    fn test_reason_serializes_screaming_case() {
        let json = serde_json::to_string(&MatchReason::BelowThreshold).unwrap();
        assert_eq!(json, "\"BELOW_THRESHOLD\"");
    }

    #[test]
    fn test_summary_counts_and_dedupes_targets() {
        let accepted = |id: &str, target: &str| MatchDecision {
            source_id: id.to_string(),
            target_id: Some(target.to_string()),
            score: 0.9,
            accepted: true,
            reason: MatchReason::Accepted,
        };
        let outcomes = vec![
            TrackOutcome {
                position: 0,
                track: "a".into(),
                result: TrackResult::Decided {
                    decision: accepted("1", "T1"),
                    from_cache: true,
                },
            },
            TrackOutcome {
                position: 1,
                track: "b".into(),
                result: TrackResult::Failed {
                    error: "timeout".into(),
                },
            },
            TrackOutcome {
                position: 2,
                track: "c".into(),
                result: TrackResult::Decided {
                    decision: accepted("3", "T1"),
                    from_cache: false,
                },
            },
            TrackOutcome {
                position: 3,
                track: "d".into(),
                result: TrackResult::Skipped {
                    reason: "missing title".into(),
                },
            },
        ];
        let summary = RunSummary::from_outcomes(outcomes);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.accepted_targets(), vec!["T1".to_string()]);
        assert!((summary.match_rate() - 50.0).abs() < 1e-9);
    }
}
