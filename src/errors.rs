// src/errors.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskchainError {
    #[error("unable to resolve source for {} (basePath = {})", .target.display(), .base.display())]
    Resolution { target: PathBuf, base: PathBuf },

    #[error("unable to stat file {path:?}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("unable to get contents for {0}")]
    NoContents(String),

    #[error("unable to persist task contents for {0}: not a file")]
    NotPersistable(String),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in task requirements: {0}")]
    RequiresCycle(String),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskchainError>;
