//! Error taxonomy for the transfer engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by catalog collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Network/API style failure worth retrying (busy database, timeout).
    #[error("transient catalog failure: {0}")]
    Transient(String),
    /// Cannot authenticate or connect. No matching can proceed.
    #[error("cannot connect to catalog: {0}")]
    Connect(String),
    /// Request failed for a reason retrying will not fix.
    #[error("catalog request failed: {0}")]
    Request(String),
    #[error("not found in catalog: {0}")]
    NotFound(String),
}

impl CatalogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum TransferError {
    /// Bad operator input, rejected before any matching begins.
    #[error("invalid input: {0}")]
    Validation(String),
    /// A source descriptor is missing required fields.
    #[error("bad track data: {0}")]
    Data(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("cannot persist {path}: {message}")]
    Persistence { path: PathBuf, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("settings error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl TransferError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TransferError::Validation(msg.into())
    }

    /// True for errors that must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::Catalog(CatalogError::Connect(_)))
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
