//! casesort - pattern-driven organization of case files
//!
//! This library matches file names against named regex patterns, extracts the
//! case number and year from each match, and moves the files into folders
//! rendered from the pattern's destination template, optionally backing them
//! up first. Patterns and settings live in a JSON or TOML document.

pub mod backup;
pub mod classifier;
pub mod cli;
pub mod engine;
pub mod error;
pub mod file_mover;
pub mod logging;
pub mod output;
pub mod path_resolver;
pub mod pattern_store;

pub use backup::BackupManager;
pub use classifier::{Classification, Classifier, CompiledPattern, ExtractedFields};
pub use engine::{
    CancellationToken, EngineState, MoveOutcome, MoveStatus, OrganizationEngine, PlannedMove,
    RunHandle, RunOptions, RunReport,
};
pub use error::{EngineError, FileError, LoadWarning, StoreError, ValidationError};
pub use file_mover::{ConflictPolicy, FileMover};
pub use path_resolver::PathResolver;
pub use pattern_store::{Pattern, PatternDocument, PatternStore, Settings};

pub use cli::{Cli, open_store, run_cli};
