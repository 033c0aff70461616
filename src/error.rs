//! Error types for casesort.
//!
//! Errors are split by how far they reach: `ValidationError` and `StoreError`
//! belong to the pattern store, `FileError` is recorded against a single file
//! and never stops a batch, and `EngineError` is fatal to a whole run.

use std::path::PathBuf;
use thiserror::Error;

/// A pattern definition that breaks one of the validation rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("pattern name must not be empty")]
    EmptyName,

    #[error("pattern description must not be empty")]
    EmptyDescription,

    #[error("invalid regex pattern '{pattern}': {reason}")]
    InvalidMatcher { pattern: String, reason: String },

    #[error("destination template '{template}' must contain the {placeholder} placeholder")]
    MissingPlaceholder {
        template: String,
        placeholder: &'static str,
    },
}

/// Errors raised by the pattern store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to write pattern file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize pattern document: {0}")]
    Serialize(String),

    #[error("unknown setting '{0}'")]
    UnknownSetting(String),
}

/// Result type for pattern store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Something wrong with a pattern document that was loaded anyway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    #[error("pattern document {path} is invalid, using defaults (the next save replaces it): {reason}")]
    UnreadableDocument { path: PathBuf, reason: String },

    #[error("pattern '{name}' ignored: {source}")]
    InvalidPattern {
        name: String,
        source: ValidationError,
    },
}

/// A failure while processing one file. Recorded in that file's outcome.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("pattern matched but captured no {0}")]
    MissingField(&'static str),

    #[error("not a backup file (expected a .bak suffix): {0}")]
    NotABackup(PathBuf),
}

impl FileError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Result type for single-file operations.
pub type FileResult<T> = Result<T, FileError>;

/// Errors that stop a run before any file is touched, or prevent it starting.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("pattern '{0}' not found")]
    UnknownPattern(String),

    #[error("pattern '{name}' has an invalid matcher: {reason}")]
    InvalidPattern { name: String, reason: String },

    #[error("cannot read directory {path}: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("an organization run is already in progress")]
    AlreadyRunning,

    #[error("organization worker failed: {0}")]
    Worker(String),
}
