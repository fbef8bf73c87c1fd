//! JSON file persistence shared by the result cache and override store.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

use crate::error::{Result, TransferError};

/// Load a JSON store. A missing file is an empty store; an unreadable or
/// corrupt file is logged and also treated as empty.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!("cannot read {} file {}: {}; starting empty", what, path.display(), e);
            return T::default();
        }
    };
    if contents.trim().is_empty() {
        return T::default();
    }
    match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => {
            warn!("{} file {} is corrupt ({}); starting empty", what, path.display(), e);
            T::default()
        }
    }
}

/// Replace `path` with the JSON form of `value`.
///
/// Writes a sibling temp file and renames it over the target, so readers
/// and interrupted runs only ever see a complete file.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let persistence = |e: &dyn std::fmt::Display| TransferError::Persistence {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| persistence(&e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    fs::write(&tmp, json).map_err(|e| persistence(&e))?;
    fs::rename(&tmp, path).map_err(|e| persistence(&e))?;
    Ok(())
}
