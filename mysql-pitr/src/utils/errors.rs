//! Custom error types for backup and recovery operations.

use chrono::NaiveDateTime;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(PathBuf),

    #[error("Already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("No full backup exists at or before {0}")]
    NoSuitableFullBackup(NaiveDateTime),

    #[error("Chain merge failed at step {step}: {source}")]
    ChainMergeFailed {
        step: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Archive corrupt: {path}: {reason}")]
    ArchiveCorrupt { path: PathBuf, reason: String },

    #[error("{tool} exited with {status}: {stderr}")]
    ExternalToolFailure {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("All service control strategies failed for '{0}'")]
    ServiceControlFailure(String),

    #[error("Subtree is locked by another operation: {0}")]
    SubtreeLocked(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
