//! Catalog collaborator contracts.
//!
//! The engine never talks to a catalog directly; it goes through these
//! traits so the matcher can be tested against scripted catalogs and the CLI
//! can plug in the local file-backed implementations from `local`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result, TransferError};
use crate::models::{Candidate, TrackDescriptor};

/// Playlist as read from the source catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePlaylist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub tracks: Vec<TrackDescriptor>,
}

/// Playlist that exists in the target catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TargetPlaylist {
    pub id: String,
    pub name: String,
    pub description: String,
    pub public: bool,
}

pub trait SourceCatalog: Send + Sync {
    fn playlist(&self, playlist_ref: &str) -> std::result::Result<SourcePlaylist, CatalogError>;

    fn list_tracks(&self, playlist_ref: &str) -> std::result::Result<Vec<TrackDescriptor>, CatalogError> {
        Ok(self.playlist(playlist_ref)?.tracks)
    }

    fn list_liked_tracks(&self) -> std::result::Result<Vec<TrackDescriptor>, CatalogError>;

    /// Playlists owned by `user`, tracks included.
    fn list_user_playlists(&self, user: &str) -> std::result::Result<Vec<SourcePlaylist>, CatalogError>;

    fn track(&self, track_ref: &str) -> std::result::Result<TrackDescriptor, CatalogError>;
}

pub trait TargetCatalog: Send + Sync {
    fn search(&self, query: &str) -> std::result::Result<Vec<Candidate>, CatalogError>;

    fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> std::result::Result<String, CatalogError>;

    fn add_to_playlist(&self, playlist_id: &str, target_id: &str) -> std::result::Result<(), CatalogError>;

    fn like_track(&self, target_id: &str) -> std::result::Result<(), CatalogError>;

    fn find_playlist(&self, name: &str) -> std::result::Result<Option<TargetPlaylist>, CatalogError>;

    fn clear_playlist(&self, playlist_id: &str) -> std::result::Result<(), CatalogError>;

    fn list_playlists(&self) -> std::result::Result<Vec<TargetPlaylist>, CatalogError>;

    fn delete_playlist(&self, playlist_id: &str) -> std::result::Result<(), CatalogError>;
}

// ============================================================================
// Reference Parsing
// ============================================================================

/// Catalog link: "https://open.example.com/playlist/<id>?si=..."
static LINK_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^/]+/(?:[^/?#]+/)*(?P<id>[A-Za-z0-9_\-]+)/?(?:[?#].*)?$").unwrap());

static BARE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap());

/// Extract a catalog id from a bare id or a catalog link.
pub fn parse_catalog_ref(reference: &str) -> Result<String> {
    let trimmed = reference.trim();
    if let Some(id) = trimmed.strip_prefix("spotify:").and_then(|s| s.rsplit(':').next()) {
        if BARE_ID.is_match(id) {
            return Ok(id.to_string());
        }
    }
    if BARE_ID.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }
    LINK_ID
        .captures(trimmed)
        .and_then(|caps| caps.name("id"))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| TransferError::validation(format!("malformed catalog reference '{}'", reference)))
}

/// Target ids are opaque but must be a single non-blank token.
pub fn validate_target_id(id: &str) -> Result<()> {
    if BARE_ID.is_match(id) {
        Ok(())
    } else {
        Err(TransferError::validation(format!("malformed target id '{}'", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_id() {
        assert_eq!(parse_catalog_ref("37i9dQZF1DXcBWIGoYBM5M").unwrap(), "37i9dQZF1DXcBWIGoYBM5M");
    }

    #[test]
    fn test_parse_link() {
        assert_eq!(
            parse_catalog_ref("https://open.spotify.com/playlist/37i9dQZF1DX?si=abc123").unwrap(),
            "37i9dQZF1DX"
        );
        assert_eq!(parse_catalog_ref("https://open.spotify.com/track/4uLU6hMC/").unwrap(), "4uLU6hMC");
    }

    #[test]
    fn test_parse_uri() {
        assert_eq!(parse_catalog_ref("spotify:playlist:abcDEF").unwrap(), "abcDEF");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_catalog_ref("").is_err());
        assert!(parse_catalog_ref("not a link").is_err());
    }

    #[test]
    fn test_validate_target_id() {
        assert!(validate_target_id("dQw4w9WgXcQ").is_ok());
        assert!(validate_target_id("").is_err());
        assert!(validate_target_id("two words").is_err());
    }
}
