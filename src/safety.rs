//! Safety checks run before any store is cleared or written.
//!
//! The cache and override files are rewritten in place, so a misconfigured
//! path could clobber a catalog input or the other store.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TransferError};

/// Resolve symlinks and `..` where the file exists; otherwise compare the
/// path as given.
fn comparable(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Validates that the store paths are safe to overwrite.
///
/// Checks:
/// - The cache and override files are different files
/// - Neither store is one of the catalog inputs
pub fn validate_store_paths(cache: &Path, overrides: &Path, inputs: &[&Path]) -> Result<()> {
    let cache_key = comparable(cache);
    let overrides_key = comparable(overrides);

    if cache_key == overrides_key {
        return Err(TransferError::validation(format!(
            "Safety check failed: cache and override store share the file '{}'",
            cache.display()
        )));
    }

    for input in inputs {
        let input_key = comparable(input);
        for (store, key) in [(cache, &cache_key), (overrides, &overrides_key)] {
            if *key == input_key {
                return Err(TransferError::validation(format!(
                    "Safety check failed: store '{}' cannot be the catalog input '{}'",
                    store.display(),
                    input.display()
                )));
            }
        }
    }

    Ok(())
}
