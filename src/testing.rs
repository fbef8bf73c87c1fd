//! In-memory catalogs for unit tests.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Mutex;

use crate::catalog::{SourceCatalog, SourcePlaylist, TargetCatalog, TargetPlaylist};
use crate::error::CatalogError;
use crate::models::{Candidate, TrackDescriptor};

#[derive(Default)]
struct TargetState {
    queries: Vec<String>,
    failures_remaining: u32,
    playlists: Vec<(TargetPlaylist, Vec<String>)>,
    liked: Vec<String>,
}

/// Target catalog answering searches from a fixed query -> results table.
#[derive(Default)]
pub struct ScriptedCatalog {
    results: FxHashMap<String, Vec<Candidate>>,
    always_failing: FxHashSet<String>,
    refuse_connection: bool,
    state: Mutex<TargetState>,
}

impl ScriptedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(mut self, query: &str, candidates: Vec<Candidate>) -> Self {
        self.results.insert(query.to_string(), candidates);
        self
    }

    /// The first `n` searches fail with a transient error.
    pub fn failing_first(self, n: u32) -> Self {
        self.state.lock().unwrap().failures_remaining = n;
        self
    }

    /// Every search for `query` fails with a transient error.
    pub fn always_failing(mut self, query: &str) -> Self {
        self.always_failing.insert(query.to_string());
        self
    }

    pub fn refusing_connection(mut self) -> Self {
        self.refuse_connection = true;
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn liked(&self) -> Vec<String> {
        self.state.lock().unwrap().liked.clone()
    }

    pub fn playlist_items(&self, name: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .playlists
            .iter()
            .find(|(p, _)| p.name == name)
            .map(|(_, items)| items.clone())
    }
}

impl TargetCatalog for ScriptedCatalog {
    fn search(&self, query: &str) -> Result<Vec<Candidate>, CatalogError> {
        if self.refuse_connection {
            return Err(CatalogError::Connect("credentials rejected".into()));
        }
        let mut state = self.state.lock().unwrap();
        state.queries.push(query.to_string());
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(CatalogError::Transient("service unavailable".into()));
        }
        if self.always_failing.contains(query) {
            return Err(CatalogError::Transient("timed out".into()));
        }
        Ok(self.results.get(query).cloned().unwrap_or_default())
    }

    fn create_playlist(&self, name: &str, description: &str, public: bool) -> Result<String, CatalogError> {
        let mut state = self.state.lock().unwrap();
        let id = format!("PL{}", state.playlists.len() + 1);
        state.playlists.push((
            TargetPlaylist {
                id: id.clone(),
                name: name.to_string(),
                description: description.to_string(),
                public,
            },
            Vec::new(),
        ));
        Ok(id)
    }

    fn add_to_playlist(&self, playlist_id: &str, target_id: &str) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        let (_, items) = state
            .playlists
            .iter_mut()
            .find(|(p, _)| p.id == playlist_id)
            .ok_or_else(|| CatalogError::NotFound(playlist_id.to_string()))?;
        items.push(target_id.to_string());
        Ok(())
    }

    fn like_track(&self, target_id: &str) -> Result<(), CatalogError> {
        self.state.lock().unwrap().liked.push(target_id.to_string());
        Ok(())
    }

    fn find_playlist(&self, name: &str) -> Result<Option<TargetPlaylist>, CatalogError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .playlists
            .iter()
            .find(|(p, _)| p.name == name)
            .map(|(p, _)| p.clone()))
    }

    fn clear_playlist(&self, playlist_id: &str) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        if let Some((_, items)) = state.playlists.iter_mut().find(|(p, _)| p.id == playlist_id) {
            items.clear();
        }
        Ok(())
    }

    fn list_playlists(&self) -> Result<Vec<TargetPlaylist>, CatalogError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .playlists
            .iter()
            .map(|(p, _)| p.clone())
            .collect())
    }

    fn delete_playlist(&self, playlist_id: &str) -> Result<(), CatalogError> {
        self.state
            .lock()
            .unwrap()
            .playlists
            .retain(|(p, _)| p.id != playlist_id);
        Ok(())
    }
}

/// Source catalog over in-memory playlists.
#[derive(Default)]
pub struct MemorySource {
    pub playlists: Vec<SourcePlaylist>,
    pub liked: Vec<TrackDescriptor>,
}

impl SourceCatalog for MemorySource {
    fn playlist(&self, playlist_ref: &str) -> Result<SourcePlaylist, CatalogError> {
        self.playlists
            .iter()
            .find(|p| p.id == playlist_ref)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(playlist_ref.to_string()))
    }

    fn list_liked_tracks(&self) -> Result<Vec<TrackDescriptor>, CatalogError> {
        Ok(self.liked.clone())
    }

    fn list_user_playlists(&self, user: &str) -> Result<Vec<SourcePlaylist>, CatalogError> {
        Ok(self.playlists.iter().filter(|p| p.owner == user).cloned().collect())
    }

    fn track(&self, track_ref: &str) -> Result<TrackDescriptor, CatalogError> {
        self.playlists
            .iter()
            .flat_map(|p| p.tracks.iter())
            .chain(self.liked.iter())
            .find(|t| t.source_id == track_ref)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(track_ref.to_string()))
    }
}
