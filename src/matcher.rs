//! Candidate selection and the accept/reject policy.
//!
//! A match runs in three steps: query the target catalog (through the
//! retry wrapper), score every candidate, then decide. [`Matcher::decide`]
//! is deterministic for a fixed candidate list; all I/O lives in
//! [`Matcher::match_track`].

use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::catalog::TargetCatalog;
use crate::error::{CatalogError, Result, TransferError};
use crate::models::{Candidate, MatchDecision, MatchReason, TrackDescriptor};
use crate::retry::RetryPolicy;
use crate::scoring::Scorer;

/// Scores within this distance are ties.
pub const SCORE_EPSILON: f64 = 1e-9;

// ============================================================================
// Threshold
// ============================================================================

/// Minimum score for an automatic match, validated to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Threshold(f64);

impl Threshold {
    pub const DEFAULT: Threshold = Threshold(0.6);

    /// Out-of-range values are rejected, never clamped.
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Threshold(value))
        } else {
            Err(TransferError::validation(format!(
                "confidence must be between 0 and 1, got {}",
                value
            )))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// ============================================================================
// Matcher
// ============================================================================

/// One scored candidate, kept for `search` diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
}

pub struct Matcher {
    scorer: Box<dyn Scorer>,
    threshold: Threshold,
    retry: RetryPolicy,
}

impl Matcher {
    pub fn new(scorer: Box<dyn Scorer>, threshold: Threshold, retry: RetryPolicy) -> Self {
        Self {
            scorer,
            threshold,
            retry,
        }
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    pub fn scorer(&self) -> &dyn Scorer {
        self.scorer.as_ref()
    }

    /// QUERY step: candidates for `source`, transient failures retried.
    pub fn query(
        &self,
        source: &TrackDescriptor,
        catalog: &dyn TargetCatalog,
    ) -> std::result::Result<Vec<Candidate>, CatalogError> {
        let query = source.search_query();
        let candidates = self.retry.run(&format!("search '{}'", query), || catalog.search(&query))?;
        debug!("search '{}' returned {} candidate(s)", query, candidates.len());
        Ok(candidates)
    }

    /// SCORE_ALL step, in catalog order.
    pub fn score_all(&self, source: &TrackDescriptor, candidates: Vec<Candidate>) -> Vec<ScoredCandidate> {
        candidates
            .into_iter()
            .map(|candidate| ScoredCandidate {
                score: self.scorer.score(source, &candidate),
                candidate,
            })
            .collect()
    }

    /// DECIDE step.
    ///
    /// Highest score wins. Ties go to the candidate whose duration is
    /// closest to the source's (when known), then to catalog order.
    pub fn decide(&self, source: &TrackDescriptor, scored: &[ScoredCandidate]) -> MatchDecision {
        let Some(best) = select_best(source, scored) else {
            return MatchDecision::no_candidates(&source.source_id);
        };

        let (accepted, reason) = self.verdict(best.score);
        MatchDecision {
            source_id: source.source_id.clone(),
            target_id: Some(best.candidate.target_id.clone()),
            score: best.score,
            accepted,
            reason,
        }
    }

    fn verdict(&self, score: f64) -> (bool, MatchReason) {
        if score >= self.threshold.value() {
            (true, MatchReason::Accepted)
        } else {
            (false, MatchReason::BelowThreshold)
        }
    }

    /// Re-judge a decision made earlier (possibly under another threshold)
    /// against this matcher's threshold. Decisions without a target stay
    /// NO_CANDIDATES.
    pub fn rejudge(&self, decision: MatchDecision) -> MatchDecision {
        if decision.target_id.is_none() {
            return decision;
        }
        let (accepted, reason) = self.verdict(decision.score);
        MatchDecision {
            accepted,
            reason,
            ..decision
        }
    }

    /// Query, score and decide for one source track.
    pub fn match_track(
        &self,
        source: &TrackDescriptor,
        catalog: &dyn TargetCatalog,
    ) -> std::result::Result<MatchDecision, CatalogError> {
        let candidates = self.query(source, catalog)?;
        let scored = self.score_all(source, candidates);
        Ok(self.decide(source, &scored))
    }
}

/// Duration distance used for tie-breaking; unknown durations sort last.
fn duration_distance(source: &TrackDescriptor, candidate: &Candidate) -> Option<u32> {
    match (source.duration, candidate.duration) {
        (Some(a), Some(b)) => Some(a.abs_diff(b)),
        _ => None,
    }
}

fn closer_duration(source: &TrackDescriptor, challenger: &Candidate, incumbent: &Candidate) -> bool {
    if source.duration.is_none() {
        return false;
    }
    match (duration_distance(source, challenger), duration_distance(source, incumbent)) {
        (Some(a), Some(b)) => a < b,
        (Some(_), None) => true,
        _ => false,
    }
}

fn select_best<'a>(source: &TrackDescriptor, scored: &'a [ScoredCandidate]) -> Option<&'a ScoredCandidate> {
    let mut best: Option<&ScoredCandidate> = None;
    for current in scored {
        best = match best {
            None => Some(current),
            Some(incumbent) => {
                let diff = current.score - incumbent.score;
                if diff > SCORE_EPSILON
                    || (diff.abs() <= SCORE_EPSILON
                        && closer_duration(source, &current.candidate, &incumbent.candidate))
                {
                    Some(current)
                } else {
                    Some(incumbent)
                }
            }
        };
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{scorer_for, ScoringMode, ScoringWeights};
    use crate::testing::ScriptedCatalog;

    fn let_it_be() -> TrackDescriptor {
        TrackDescriptor {
            title: "Let It Be".into(),
            artists: vec!["The Beatles".into()],
            album: None,
            duration: Some(243),
            source_id: "src-1".into(),
        }
    }

    fn candidate(id: &str, title: &str, artist: &str, duration: Option<u32>) -> Candidate {
        Candidate {
            target_id: id.into(),
            title: title.into(),
            artists: vec![artist.into()],
            album: None,
            duration,
        }
    }

    fn matcher(threshold: f64) -> Matcher {
        Matcher::new(
            scorer_for(ScoringMode::Default, ScoringWeights::default()),
            Threshold::new(threshold).unwrap(),
            RetryPolicy::immediate(3),
        )
    }

    fn let_it_be_candidates() -> Vec<Candidate> {
        vec![
            candidate("A", "Let It Be - Remastered 2009", "The Beatles", Some(243)),
            candidate("B", "Let It Be", "Someone Else", Some(180)),
        ]
    }

    #[test]
    fn test_let_it_be_selects_remaster() {
        let m = matcher(0.6);
        let source = let_it_be();
        let scored = m.score_all(&source, let_it_be_candidates());
        let decision = m.decide(&source, &scored);
        assert_eq!(decision.target_id.as_deref(), Some("A"));
        assert_eq!(decision.reason, MatchReason::Accepted);
        assert!(decision.accepted);
        assert!(decision.score >= 0.6);
    }

    #[test]
    fn test_no_candidates() {
        let m = matcher(0.6);
        let decision = m.decide(&let_it_be(), &[]);
        assert_eq!(decision.reason, MatchReason::NoCandidates);
        assert!(!decision.accepted);
        assert_eq!(decision.target_id, None);
    }

    #[test]
    fn test_below_threshold_keeps_target_for_diagnostics() {
        let m = matcher(0.95);
        let source = let_it_be();
        // Title and artist match, unknown album and a 20s duration gap
        let loose = vec![candidate("L", "Let It Be", "The Beatles", Some(263))];
        let scored = m.score_all(&source, loose);
        assert!((scored[0].score - 0.81).abs() < 1e-9);
        let decision = m.decide(&source, &scored);
        assert_eq!(decision.reason, MatchReason::BelowThreshold);
        assert!(!decision.accepted);
        assert_eq!(decision.target_id.as_deref(), Some("L"));
        assert!((decision.score - 0.81).abs() < 1e-9);
    }

    #[test]
    fn test_acceptance_is_monotonic_in_threshold() {
        let source = let_it_be();
        let candidates = let_it_be_candidates();
        let mut accepted_at_higher = false;
        for step in (0..=20).rev() {
            let m = matcher(step as f64 / 20.0);
            let scored = m.score_all(&source, candidates.clone());
            let accepted = m.decide(&source, &scored).accepted;
            if accepted_at_higher {
                assert!(accepted, "accepted at a higher threshold but not at {}", step as f64 / 20.0);
            }
            accepted_at_higher |= accepted;
        }
        assert!(accepted_at_higher);
    }

    #[test]
    fn test_tie_prefers_closest_duration() {
        let m = matcher(0.0);
        let source = let_it_be();
        let scored = vec![
            ScoredCandidate {
                candidate: candidate("far", "x", "y", Some(250)),
                score: 0.7,
            },
            ScoredCandidate {
                candidate: candidate("unknown", "x", "y", None),
                score: 0.7,
            },
            ScoredCandidate {
                candidate: candidate("near", "x", "y", Some(244)),
                score: 0.7,
            },
        ];
        assert_eq!(m.decide(&source, &scored).target_id.as_deref(), Some("near"));
    }

    #[test]
    fn test_tie_without_source_duration_keeps_catalog_order() {
        let m = matcher(0.0);
        let mut source = let_it_be();
        source.duration = None;
        let scored = vec![
            ScoredCandidate {
                candidate: candidate("first", "x", "y", Some(300)),
                score: 0.5,
            },
            ScoredCandidate {
                candidate: candidate("second", "x", "y", Some(243)),
                score: 0.5,
            },
        ];
        assert_eq!(m.decide(&source, &scored).target_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_match_track_queries_title_and_primary_artist() {
        let catalog = ScriptedCatalog::new().with_results("Let It Be The Beatles", let_it_be_candidates());
        let decision = matcher(0.6).match_track(&let_it_be(), &catalog).unwrap();
        assert_eq!(decision.target_id.as_deref(), Some("A"));
        assert_eq!(catalog.queries(), vec!["Let It Be The Beatles".to_string()]);
    }

    #[test]
    fn test_match_track_retries_transient_failures() {
        let catalog = ScriptedCatalog::new()
            .with_results("Let It Be The Beatles", let_it_be_candidates())
            .failing_first(2);
        let decision = matcher(0.6).match_track(&let_it_be(), &catalog).unwrap();
        assert_eq!(decision.reason, MatchReason::Accepted);
        assert_eq!(catalog.queries().len(), 3);
    }

    #[test]
    fn test_match_track_surfaces_exhausted_retries() {
        let catalog = ScriptedCatalog::new().failing_first(10);
        let result = matcher(0.6).match_track(&let_it_be(), &catalog);
        assert!(matches!(result, Err(CatalogError::Transient(_))));
        assert_eq!(catalog.queries().len(), 3);
    }

    #[test]
    fn test_rejudge_applies_current_threshold() {
        let source = let_it_be();
        let loose = vec![candidate("L", "Let It Be", "The Beatles", Some(263))];
        let lenient = matcher(0.6);
        let strict = matcher(0.95);

        let accepted = lenient.decide(&source, &lenient.score_all(&source, loose.clone()));
        assert_eq!(accepted.reason, MatchReason::Accepted);
        let rejected = strict.rejudge(accepted.clone());
        assert_eq!(rejected.reason, MatchReason::BelowThreshold);
        assert!(!rejected.accepted);
        assert_eq!(rejected.target_id.as_deref(), Some("L"));
        assert_eq!(rejected.score, accepted.score);

        let below = strict.decide(&source, &strict.score_all(&source, loose));
        assert_eq!(lenient.rejudge(below), accepted);

        let none = MatchDecision::no_candidates("src-1");
        assert_eq!(lenient.rejudge(none.clone()), none);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Threshold::new(0.0).is_ok());
        assert!(Threshold::new(1.0).is_ok());
        assert!(Threshold::new(1.01).is_err());
        assert!(Threshold::new(-0.1).is_err());
        assert!(Threshold::new(f64::NAN).is_err());
        assert_eq!(Threshold::default().value(), 0.6);
    }
}
