//! Manual override store: wrong target id -> operator-confirmed target id.
//!
//! Overrides are global. Any decision whose target id is a key in the store
//! is rewritten at read time, whether it came fresh from the matcher or was
//! replayed from the result cache. Cached entries themselves are never
//! touched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::catalog::validate_target_id;
use crate::error::{Result, TransferError};
use crate::models::{MatchDecision, MatchReason};
use crate::store::{load_or_default, write_atomic};

#[derive(Debug, Default)]
pub struct OverrideStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
}

impl OverrideStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. Entries that are malformed, self-mapped or close a
    /// cycle (a hand-edited file) are dropped with a warning, in key order.
    pub fn load(path: &Path) -> Self {
        let raw: BTreeMap<String, String> = load_or_default(path, "override");
        let mut store = Self {
            path: Some(path.to_path_buf()),
            entries: BTreeMap::new(),
        };
        for (old, new) in raw {
            let (old, new) = (old.trim(), new.trim());
            let valid = validate_target_id(old).is_ok() && validate_target_id(new).is_ok();
            if !valid || store.would_cycle(old, new) {
                warn!("ignoring override {} -> {} in {}", old, new, path.display());
                continue;
            }
            store.entries.insert(old.to_string(), new.to_string());
        }
        debug!("loaded {} override(s) from {}", store.entries.len(), path.display());
        store
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, old_target_id: &str) -> Option<&str> {
        self.entries.get(old_target_id).map(|s| s.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Final id after following chained overrides (A -> B -> C gives C).
    pub fn final_target(&self, target_id: &str) -> String {
        let mut current = target_id;
        // Chains are acyclic (enforced by set_override); the bound is a guard
        // against hand-edited files.
        for _ in 0..=self.entries.len() {
            match self.entries.get(current) {
                Some(next) => current = next.as_str(),
                None => break,
            }
        }
        current.to_string()
    }

    /// True if mapping `old -> new` would let a chain come back to `old`.
    /// `old`'s current mapping is ignored since the new one replaces it.
    fn would_cycle(&self, old: &str, new: &str) -> bool {
        let mut current = new;
        for _ in 0..=self.entries.len() {
            if current == old {
                return true;
            }
            match self.entries.get(current) {
                Some(next) => current = next.as_str(),
                None => return false,
            }
        }
        // Chain longer than the store: already cyclic
        true
    }

    /// Record that `old_target_id` should be replaced by `new_target_id`.
    ///
    /// Rejects malformed ids, self-mappings and mappings that would create a
    /// cycle. Persists immediately for file-backed stores.
    pub fn set_override(&mut self, old_target_id: &str, new_target_id: &str) -> Result<()> {
        let old = old_target_id.trim();
        let new = new_target_id.trim();
        validate_target_id(old)?;
        validate_target_id(new)?;
        if old == new {
            return Err(TransferError::validation(format!(
                "override for '{}' must point to a different id",
                old
            )));
        }
        if self.would_cycle(old, new) {
            return Err(TransferError::validation(format!(
                "override {} -> {} would create a cycle",
                old, new
            )));
        }

        let previous = self.entries.insert(old.to_string(), new.to_string());
        if let Err(e) = self.save() {
            // Keep memory and disk in agreement
            match previous {
                Some(p) => self.entries.insert(old.to_string(), p),
                None => self.entries.remove(old),
            };
            return Err(e);
        }
        info!("override recorded: {} -> {}", old, new);
        Ok(())
    }

    pub fn remove(&mut self, old_target_id: &str) -> Result<Option<String>> {
        let removed = self.entries.remove(old_target_id.trim());
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    /// Rewrite `decision` if its target id has an override.
    ///
    /// The rewritten decision is accepted with reason `OVERRIDDEN`
    /// regardless of the original reason or score. Idempotent.
    pub fn resolve(&self, decision: MatchDecision) -> MatchDecision {
        let Some(target_id) = decision.target_id.as_deref() else {
            return decision;
        };
        if !self.entries.contains_key(target_id) {
            return decision;
        }
        let replacement = self.final_target(target_id);
        debug!(
            "override applied for {}: {} -> {}",
            decision.source_id, target_id, replacement
        );
        MatchDecision {
            target_id: Some(replacement),
            accepted: true,
            reason: MatchReason::Overridden,
            ..decision
        }
    }

    fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => write_atomic(path, &self.entries),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn decision(target: Option<&str>, reason: MatchReason, score: f64) -> MatchDecision {
        MatchDecision {
            source_id: "s1".into(),
            target_id: target.map(|t| t.to_string()),
            score,
            accepted: reason == MatchReason::Accepted,
            reason,
        }
    }

    #[test]
    fn test_resolve_rewrites_matching_target() {
        let mut store = OverrideStore::in_memory();
        store.set_override("A", "C").unwrap();
        let resolved = store.resolve(decision(Some("A"), MatchReason::Accepted, 0.9));
        assert_eq!(resolved.target_id.as_deref(), Some("C"));
        assert_eq!(resolved.reason, MatchReason::Overridden);
        assert!(resolved.accepted);
        assert_eq!(resolved.score, 0.9);
    }

    #[test]
    fn test_resolve_accepts_below_threshold() {
        let mut store = OverrideStore::in_memory();
        store.set_override("A", "C").unwrap();
        let resolved = store.resolve(decision(Some("A"), MatchReason::BelowThreshold, 0.2));
        assert!(resolved.accepted);
        assert_eq!(resolved.reason, MatchReason::Overridden);
    }

    #[test]
    fn test_resolve_leaves_other_decisions_alone() {
        let mut store = OverrideStore::in_memory();
        store.set_override("A", "C").unwrap();
        let untouched = decision(Some("B"), MatchReason::Accepted, 0.9);
        assert_eq!(store.resolve(untouched.clone()), untouched);
        let empty = decision(None, MatchReason::NoCandidates, 0.0);
        assert_eq!(store.resolve(empty.clone()), empty);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut store = OverrideStore::in_memory();
        store.set_override("A", "B").unwrap();
        store.set_override("B", "C").unwrap();
        for d in [
            decision(Some("A"), MatchReason::Accepted, 0.9),
            decision(Some("B"), MatchReason::BelowThreshold, 0.3),
            decision(Some("Z"), MatchReason::Accepted, 0.8),
            decision(None, MatchReason::NoCandidates, 0.0),
        ] {
            let once = store.resolve(d);
            assert_eq!(store.resolve(once.clone()), once);
        }
        assert_eq!(
            store.resolve(decision(Some("A"), MatchReason::Accepted, 0.9)).target_id.as_deref(),
            Some("C")
        );
    }

    #[test]
    fn test_set_override_rejects_bad_input() {
        let mut store = OverrideStore::in_memory();
        assert!(store.set_override("A", "A").is_err());
        assert!(store.set_override("", "B").is_err());
        assert!(store.set_override("A", "has space").is_err());
        store.set_override("A", "B").unwrap();
        assert!(store.set_override("B", "A").is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_repointing_existing_key_cannot_close_cycle() {
        let mut store = OverrideStore::in_memory();
        store.set_override("X", "A").unwrap();
        store.set_override("A", "B").unwrap();
        assert!(store.set_override("A", "X").is_err());
        assert_eq!(store.get("A"), Some("B"));

        let once = store.resolve(decision(Some("A"), MatchReason::Accepted, 0.9));
        assert_eq!(store.resolve(once.clone()), once);
        assert_eq!(once.target_id.as_deref(), Some("B"));

        // Re-pointing to something off the chain is fine
        store.set_override("A", "C").unwrap();
        assert_eq!(store.final_target("X"), "C");
    }

    #[test]
    fn test_load_breaks_cycles_in_hand_edited_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overrides.json");
        std::fs::write(&path, r#"{"A": "X", "X": "A", "B": "B", "C": "D"}"#).unwrap();
        let store = OverrideStore::load(&path);
        // Key order: A -> X kept, B -> B dropped, C -> D kept, X -> A dropped
        assert_eq!(store.get("A"), Some("X"));
        assert_eq!(store.get("X"), None);
        assert_eq!(store.get("B"), None);
        assert_eq!(store.get("C"), Some("D"));

        for id in ["A", "X", "C"] {
            let once = store.resolve(decision(Some(id), MatchReason::Accepted, 0.9));
            assert_eq!(store.resolve(once.clone()), once);
        }
    }

    #[test]
    fn test_set_override_replaces_previous() {
        let mut store = OverrideStore::in_memory();
        store.set_override("A", "B").unwrap();
        store.set_override("A", "C").unwrap();
        assert_eq!(store.get("A"), Some("C"));
    }

    #[test]
    fn test_persists_across_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overrides.json");
        OverrideStore::load(&path).set_override("A", "C").unwrap();
        let reloaded = OverrideStore::load(&path);
        assert_eq!(reloaded.get("A"), Some("C"));

        let mut reloaded = reloaded;
        assert_eq!(reloaded.remove("A").unwrap(), Some("C".to_string()));
        assert!(OverrideStore::load(&path).is_empty());
    }
}
