//! Keyward - a loopback-only control plane for a privileged spoofing module.
//!
//! This library provides the core functionality for the `keyward` daemon and
//! CLI: the marker-file settings store, named profiles, the one-shot trigger
//! queue and its observer, keybox maintenance, and the local admin server.

pub mod cli;
pub mod commands;
pub mod config;
pub mod keybox;
pub mod observer;
pub mod profile;
pub mod server;
pub mod state;
pub mod store;
pub mod sys;

use std::path::PathBuf;


/// Library-level error type for Keyward operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Store IO error at {}: {source}", path.display())]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Path escapes the config directory")]
    PathTraversal,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap an IO error with the path it happened on.
    pub fn store_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StoreIo {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for Keyward operations.
pub type Result<T> = std::result::Result<T, Error>;
