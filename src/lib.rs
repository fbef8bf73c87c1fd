//! Playlist transfer library: matching engine, stores and local catalogs.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod local;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod overrides;
pub mod progress;
pub mod retry;
pub mod safety;
pub mod scoring;
pub mod store;
pub mod transfer;

#[cfg(test)]
pub mod testing;
