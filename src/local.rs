//! File-backed catalogs used by the command line.
//!
//! The source side is a JSON export of a streaming library. The target side
//! is a SQLite index with an FTS5 table over titles and artists, built once
//! by `import-index` and then searched for every source track. Playlists
//! and likes created by a transfer are written into the same database.

use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{validate_target_id, SourceCatalog, SourcePlaylist, TargetCatalog, TargetPlaylist};
use crate::error::{CatalogError, Result, TransferError};
use crate::models::{Candidate, TrackDescriptor};
use crate::progress::PhaseProgress;

/// Rows inserted per transaction when building the index.
const WRITE_BATCH_SIZE: usize = 10_000;

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Source: JSON Export
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct SourceExport {
    #[serde(default)]
    playlists: Vec<SourcePlaylist>,
    #[serde(default)]
    liked: Vec<TrackDescriptor>,
    /// Loose tracks addressable by `search`.
    #[serde(default)]
    tracks: Vec<TrackDescriptor>,
}

/// Source catalog over a JSON library export:
///
/// ```json
/// { "playlists": [{ "id": "...", "name": "...", "owner": "...", "public": true, "tracks": [...] }],
///   "liked": [...],
///   "tracks": [...] }
/// ```
pub struct JsonSourceCatalog {
    export: SourceExport,
}

impl JsonSourceCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            CatalogError::Connect(format!("cannot read source export {}: {}", path.display(), e))
        })?;
        let export: SourceExport = serde_json::from_str(&contents)
            .map_err(|e| TransferError::Data(format!("source export {}: {}", path.display(), e)))?;
        info!(
            "loaded source export: {} playlist(s), {} liked track(s)",
            export.playlists.len(),
            export.liked.len()
        );
        Ok(Self { export })
    }

    fn all_tracks(&self) -> impl Iterator<Item = &TrackDescriptor> {
        self.export
            .tracks
            .iter()
            .chain(self.export.liked.iter())
            .chain(self.export.playlists.iter().flat_map(|p| p.tracks.iter()))
    }
}

impl SourceCatalog for JsonSourceCatalog {
    fn playlist(&self, playlist_ref: &str) -> std::result::Result<SourcePlaylist, CatalogError> {
        self.export
            .playlists
            .iter()
            .find(|p| p.id == playlist_ref)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("source playlist '{}'", playlist_ref)))
    }

    fn list_liked_tracks(&self) -> std::result::Result<Vec<TrackDescriptor>, CatalogError> {
        Ok(self.export.liked.clone())
    }

    fn list_user_playlists(&self, user: &str) -> std::result::Result<Vec<SourcePlaylist>, CatalogError> {
        Ok(self
            .export
            .playlists
            .iter()
            .filter(|p| p.owner == user)
            .cloned()
            .collect())
    }

    fn track(&self, track_ref: &str) -> std::result::Result<TrackDescriptor, CatalogError> {
        self.all_tracks()
            .find(|t| t.source_id == track_ref)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("source track '{}'", track_ref)))
    }
}

// ============================================================================
// Target: SQLite Index
// ============================================================================

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tracks (
        id INTEGER PRIMARY KEY,
        target_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        artist TEXT NOT NULL,
        artists_json TEXT NOT NULL,
        album TEXT,
        duration_sec INTEGER
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS tracks_fts USING fts5(
        title, artist,
        content='tracks',
        content_rowid='id',
        tokenize='porter unicode61 remove_diacritics 2'
    );

    CREATE TABLE IF NOT EXISTS playlists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        public INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS playlist_items (
        playlist_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        target_id TEXT NOT NULL,
        PRIMARY KEY (playlist_id, position)
    );

    CREATE TABLE IF NOT EXISTS liked (
        target_id TEXT PRIMARY KEY
    );";

/// Busy and locked databases are worth retrying; everything else is not.
fn catalog_error(e: rusqlite::Error) -> CatalogError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            CatalogError::Transient(e.to_string())
        }
        _ => CatalogError::Request(e.to_string()),
    }
}

/// FTS5 query matching any word of `query`. Each token is quoted so
/// punctuation and FTS operators in titles cannot break the syntax.
fn fts_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

/// Inverse of the `artist` display column written by `import_index`.
fn split_display_artists(display: &str) -> Vec<String> {
    display
        .split(", ")
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

fn playlist_key(playlist_id: &str) -> std::result::Result<i64, CatalogError> {
    playlist_id
        .strip_prefix("PL")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| CatalogError::NotFound(format!("playlist '{}'", playlist_id)))
}

fn playlist_id(key: i64) -> String {
    format!("PL{}", key)
}

pub struct SqliteTargetCatalog {
    conn: Mutex<Connection>,
    limit: usize,
}

impl SqliteTargetCatalog {
    /// Open an existing index. A missing or unreadable index is a
    /// connection failure.
    pub fn open(path: &Path, limit: usize) -> std::result::Result<Self, CatalogError> {
        let connect = |e: &dyn std::fmt::Display| {
            CatalogError::Connect(format!("cannot open target index {}: {}", path.display(), e))
        };
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| connect(&e))?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| connect(&e))?;

        let has_tracks: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'tracks_fts')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| connect(&e))?;
        if !has_tracks {
            return Err(connect(&"no track index, run import-index first"));
        }
        conn.execute_batch(SCHEMA).map_err(|e| connect(&e))?;

        debug!("opened target index {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            limit: limit.max(1),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn track_count(&self) -> std::result::Result<usize, CatalogError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))
            .map_err(catalog_error)?;
        Ok(count as usize)
    }

    /// Items of a playlist in insertion order.
    pub fn playlist_items(&self, playlist_id: &str) -> std::result::Result<Vec<String>, CatalogError> {
        let key = playlist_key(playlist_id)?;
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT target_id FROM playlist_items WHERE playlist_id = ?1 ORDER BY position")
            .map_err(catalog_error)?;
        let rows = stmt
            .query_map([key], |row| row.get(0))
            .map_err(catalog_error)?;
        rows.collect::<std::result::Result<Vec<String>, _>>()
            .map_err(catalog_error)
    }

    pub fn liked_tracks(&self) -> std::result::Result<Vec<String>, CatalogError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT target_id FROM liked ORDER BY rowid")
            .map_err(catalog_error)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(catalog_error)?;
        rows.collect::<std::result::Result<Vec<String>, _>>()
            .map_err(catalog_error)
    }
}

impl TargetCatalog for SqliteTargetCatalog {
    fn search(&self, query: &str) -> std::result::Result<Vec<Candidate>, CatalogError> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT t.target_id, t.title, t.artists_json, t.album, t.duration_sec, t.artist
                 FROM tracks_fts fts
                 JOIN tracks t ON fts.rowid = t.id
                 WHERE tracks_fts MATCH ?1
                 ORDER BY fts.rank
                 LIMIT ?2",
            )
            .map_err(catalog_error)?;

        let mut rows = stmt
            .query(params![fts, self.limit as i64])
            .map_err(catalog_error)?;
        let mut candidates = Vec::new();
        while let Some(row) = rows.next().map_err(catalog_error)? {
            let target_id: String = row.get(0).map_err(catalog_error)?;
            let artists_json: String = row.get(2).map_err(catalog_error)?;
            let duration: Option<i64> = row.get(4).map_err(catalog_error)?;
            let artists = match serde_json::from_str(&artists_json) {
                Ok(artists) => artists,
                Err(e) => {
                    let display_artist: String = row.get(5).map_err(catalog_error)?;
                    warn!("corrupt artist list for {} ({}), using '{}'", target_id, e, display_artist);
                    split_display_artists(&display_artist)
                }
            };
            candidates.push(Candidate {
                target_id,
                title: row.get(1).map_err(catalog_error)?,
                artists,
                album: row.get(3).map_err(catalog_error)?,
                duration: duration.and_then(|d| u32::try_from(d).ok()),
            });
        }
        Ok(candidates)
    }

    fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> std::result::Result<String, CatalogError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO playlists (name, description, public) VALUES (?1, ?2, ?3)",
            params![name, description, public],
        )
        .map_err(catalog_error)?;
        Ok(playlist_id(conn.last_insert_rowid()))
    }

    fn add_to_playlist(&self, playlist_id: &str, target_id: &str) -> std::result::Result<(), CatalogError> {
        let key = playlist_key(playlist_id)?;
        let conn = self.conn();
        let exists: bool = conn
            .query_row("SELECT EXISTS(SELECT 1 FROM playlists WHERE id = ?1)", [key], |row| row.get(0))
            .map_err(catalog_error)?;
        if !exists {
            return Err(CatalogError::NotFound(format!("playlist '{}'", playlist_id)));
        }
        conn.execute(
            "INSERT INTO playlist_items (playlist_id, position, target_id)
             VALUES (?1, (SELECT COALESCE(MAX(position), -1) + 1 FROM playlist_items WHERE playlist_id = ?1), ?2)",
            params![key, target_id],
        )
        .map_err(catalog_error)?;
        Ok(())
    }

    fn like_track(&self, target_id: &str) -> std::result::Result<(), CatalogError> {
        self.conn()
            .execute("INSERT OR IGNORE INTO liked (target_id) VALUES (?1)", [target_id])
            .map_err(catalog_error)?;
        Ok(())
    }

    fn find_playlist(&self, name: &str) -> std::result::Result<Option<TargetPlaylist>, CatalogError> {
        self.conn()
            .query_row(
                "SELECT id, name, description, public FROM playlists WHERE name = ?1 ORDER BY id LIMIT 1",
                [name],
                |row| {
                    Ok(TargetPlaylist {
                        id: playlist_id(row.get(0)?),
                        name: row.get(1)?,
                        description: row.get(2)?,
                        public: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(catalog_error)
    }

    fn clear_playlist(&self, playlist_id: &str) -> std::result::Result<(), CatalogError> {
        let key = playlist_key(playlist_id)?;
        self.conn()
            .execute("DELETE FROM playlist_items WHERE playlist_id = ?1", [key])
            .map_err(catalog_error)?;
        Ok(())
    }

    fn list_playlists(&self) -> std::result::Result<Vec<TargetPlaylist>, CatalogError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name, description, public FROM playlists ORDER BY id")
            .map_err(catalog_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TargetPlaylist {
                    id: playlist_id(row.get(0)?),
                    name: row.get(1)?,
                    description: row.get(2)?,
                    public: row.get(3)?,
                })
            })
            .map_err(catalog_error)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(catalog_error)
    }

    fn delete_playlist(&self, playlist_id: &str) -> std::result::Result<(), CatalogError> {
        let key = playlist_key(playlist_id)?;
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(catalog_error)?;
        tx.execute("DELETE FROM playlist_items WHERE playlist_id = ?1", [key])
            .map_err(catalog_error)?;
        tx.execute("DELETE FROM playlists WHERE id = ?1", [key])
            .map_err(catalog_error)?;
        tx.commit().map_err(catalog_error)
    }
}

// ============================================================================
// Index Import
// ============================================================================

/// Build (or extend) the target index at `index` from a JSON array of
/// candidates. Re-importing a target id replaces the stored row. Returns
/// the number of rows written.
pub fn import_index(index: &Path, dump: &Path) -> Result<usize> {
    let contents = fs::read_to_string(dump)?;
    let records: Vec<Candidate> = serde_json::from_str(&contents)
        .map_err(|e| TransferError::Data(format!("index dump {}: {}", dump.display(), e)))?;

    let (valid, invalid): (Vec<Candidate>, Vec<Candidate>) = records
        .into_iter()
        .partition(|c| validate_target_id(&c.target_id).is_ok() && !c.title.trim().is_empty());
    if !invalid.is_empty() {
        warn!("skipping {} record(s) with a malformed id or no title", invalid.len());
    }

    let mut conn = Connection::open(index)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;",
    )?;
    conn.execute_batch(SCHEMA)?;

    write_tracks(&mut conn, &valid)?;
    rebuild_fts(&conn)?;
    Ok(valid.len())
}

fn write_tracks(conn: &mut Connection, records: &[Candidate]) -> Result<()> {
    let progress = PhaseProgress::bar("Writing index", records.len() as u64);

    for chunk in records.chunks(WRITE_BATCH_SIZE) {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO tracks (target_id, title, artist, artists_json, album, duration_sec)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(target_id) DO UPDATE SET
                     title = excluded.title,
                     artist = excluded.artist,
                     artists_json = excluded.artists_json,
                     album = excluded.album,
                     duration_sec = excluded.duration_sec",
            )?;

            for c in chunk {
                stmt.execute(params![
                    c.target_id,
                    c.title,
                    c.artists.join(", "),
                    serde_json::to_string(&c.artists)?,
                    c.album,
                    c.duration,
                ])?;
                progress.tick();
            }
        }
        tx.commit()?;
    }

    progress.finish(format!("Wrote {} index rows", records.len()));
    Ok(())
}

fn rebuild_fts(conn: &Connection) -> Result<()> {
    let spinner = PhaseProgress::spinner("Building FTS index");
    conn.execute("INSERT INTO tracks_fts(tracks_fts) VALUES('rebuild')", [])?;
    spinner.finish("FTS index built".to_string());
    Ok(())
}
