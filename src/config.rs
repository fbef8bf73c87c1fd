//! Settings file and data directory layout.

use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, TransferError};
use crate::matcher::Threshold;
use crate::retry::RetryPolicy;
use crate::scoring::ScoringWeights;

pub const APP_DIR_NAME: &str = "playlist-transfer";
pub const SETTINGS_FILE: &str = "settings.toml";
pub const CACHE_FILE: &str = "lookup.json";
pub const OVERRIDES_FILE: &str = "overrides.json";

pub const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchingSettings {
    pub confidence: f64,
    pub weights: ScoringWeights,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            confidence: Threshold::DEFAULT.value(),
            weights: ScoringWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchSettings {
    /// Candidates requested per query.
    pub limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

/// Contents of `settings.toml`. Every section is optional.
///
/// ```toml
/// [matching]
/// confidence = 0.7
///
/// [matching.weights]
/// title = 0.5
/// artist = 0.3
/// album = 0.1
/// duration = 0.1
///
/// [retry]
/// max_attempts = 4
///
/// [search]
/// limit = 20
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub matching: MatchingSettings,
    pub retry: RetryPolicy,
    pub search: SearchSettings,
}

impl Settings {
    /// Load and validate `path`. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no settings file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let settings: Settings = toml::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        Threshold::new(self.matching.confidence)?;
        self.matching.weights.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(TransferError::validation("retry.max_attempts must be at least 1"));
        }
        if self.search.limit == 0 {
            return Err(TransferError::validation("search.limit must be at least 1"));
        }
        Ok(())
    }

    /// The configured threshold, or `cli_override` when given.
    pub fn threshold(&self, cli_override: Option<f64>) -> Result<Threshold> {
        Threshold::new(cli_override.unwrap_or(self.matching.confidence))
    }
}

/// Where persisted state lives for one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
    pub settings: PathBuf,
    pub cache: PathBuf,
    pub overrides: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            settings: root.join(SETTINGS_FILE),
            cache: root.join(CACHE_FILE),
            overrides: root.join(OVERRIDES_FILE),
            root,
        }
    }
}

/// Platform data directory, e.g. `~/.local/share/playlist-transfer`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
