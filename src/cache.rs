//! Result cache: fingerprint -> last match decision, persisted across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::MatchDecision;
use crate::store::{load_or_default, write_atomic};

pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, MatchDecision>,
}

/// Memoized decisions. Entries never expire; [`ResultCache::clear`] is the
/// only way to force re-matching everything.
#[derive(Debug, Default)]
pub struct ResultCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, MatchDecision>,
    dirty: bool,
}

impl ResultCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`; missing, corrupt or other-version files start empty.
    pub fn load(path: &Path) -> Self {
        let file: CacheFile = load_or_default(path, "cache");
        let entries = if file.version == CACHE_FORMAT_VERSION || file.entries.is_empty() {
            file.entries
        } else {
            warn!(
                "cache file {} has format version {} (expected {}); starting empty",
                path.display(),
                file.version,
                CACHE_FORMAT_VERSION
            );
            BTreeMap::new()
        };
        debug!("loaded {} cached decision(s) from {}", entries.len(), path.display());
        Self {
            path: Some(path.to_path_buf()),
            entries,
            dirty: false,
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<MatchDecision> {
        self.entries.get(fingerprint).cloned()
    }

    pub fn put(&mut self, fingerprint: &str, decision: MatchDecision) {
        self.entries.insert(fingerprint.to_string(), decision);
        self.dirty = true;
    }

    pub fn remove(&mut self, fingerprint: &str) -> Option<MatchDecision> {
        let removed = self.entries.remove(fingerprint);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Drop every entry and persist the empty store immediately.
    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.entries.len();
        self.entries.clear();
        self.dirty = true;
        self.flush()?;
        info!("cleared {} cached decision(s)", removed);
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write pending changes. No-op for in-memory caches.
    pub fn flush(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            self.dirty = false;
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries: self.entries.clone(),
        };
        write_atomic(path, &file)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchReason;
    use tempfile::TempDir;

    fn decision(target: Option<&str>, reason: MatchReason) -> MatchDecision {
        MatchDecision {
            source_id: "s1".into(),
            target_id: target.map(|t| t.to_string()),
            score: 0.75,
            accepted: reason == MatchReason::Accepted,
            reason,
        }
    }

    #[test]
    fn test_put_then_get() {
        let mut cache = ResultCache::in_memory();
        let d = decision(Some("A"), MatchReason::Accepted);
        cache.put("id:s1", d.clone());
        assert_eq!(cache.get("id:s1"), Some(d));
        assert_eq!(cache.get("id:other"), None);
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut cache = ResultCache::in_memory();
        cache.put("id:1", decision(Some("A"), MatchReason::Accepted));
        cache.put("id:2", decision(None, MatchReason::NoCandidates));
        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.get("id:1"), None);
        assert_eq!(cache.get("id:2"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_single_key() {
        let mut cache = ResultCache::in_memory();
        cache.put("id:1", decision(Some("A"), MatchReason::Accepted));
        cache.put("id:2", decision(Some("B"), MatchReason::Accepted));
        assert!(cache.remove("id:1").is_some());
        assert_eq!(cache.len(), 1);
        assert!(cache.get("id:2").is_some());
    }

    #[test]
    fn test_persists_across_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lookup.json");
        let d = decision(Some("A"), MatchReason::BelowThreshold);

        let mut cache = ResultCache::load(&path);
        cache.put("id:s1", d.clone());
        cache.flush().unwrap();

        let reloaded = ResultCache::load(&path);
        assert_eq!(reloaded.get("id:s1"), Some(d));
    }

    #[test]
    fn test_unflushed_writes_are_not_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lookup.json");
        let mut cache = ResultCache::load(&path);
        cache.put("id:s1", decision(Some("A"), MatchReason::Accepted));
        drop(cache);
        assert!(ResultCache::load(&path).is_empty());
    }

    #[test]
    fn test_clear_persists_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lookup.json");
        let mut cache = ResultCache::load(&path);
        cache.put("id:s1", decision(Some("A"), MatchReason::Accepted));
        cache.flush().unwrap();

        ResultCache::load(&path).clear().unwrap();
        assert!(ResultCache::load(&path).is_empty());
    }

    #[test]
    fn test_other_format_version_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lookup.json");
        let mut cache = ResultCache::load(&path);
        cache.put("id:s1", decision(Some("A"), MatchReason::Accepted));
        cache.flush().unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"version\": 1"));
        std::fs::write(&path, written.replace("\"version\": 1", "\"version\": 2")).unwrap();
        assert!(ResultCache::load(&path).is_empty());

        std::fs::write(&path, written.replace("\"version\": 1,", "")).unwrap();
        assert!(ResultCache::load(&path).is_empty());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lookup.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(ResultCache::load(&path).is_empty());
    }
}
