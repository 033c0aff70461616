//! Batch organization of a directory against one pattern.
//!
//! A run walks the states `Idle -> Scanning -> Processing` and ends in
//! `Completed`, `Cancelled` or `Failed`:
//!
//! 1. Look up the pattern and compile its matcher
//! 2. List plain files directly under the directory
//! 3. Keep the files whose names match
//! 4. For each match, in listing order: back up (optional), resolve the
//!    destination, create it, move the file, report progress
//!
//! A failure on one file is recorded in its outcome and the loop goes on.
//! Only setup failures (unknown pattern, broken matcher, unreadable
//! directory) fail the whole run, and they do so before any file is touched.
//! Cancellation is checked between files, never during one.

use crate::backup::BackupManager;
use crate::classifier::{Classification, Classifier, CompiledPattern, ExtractedFields};
use crate::error::{EngineError, FileError, FileResult};
use crate::file_mover::FileMover;
use crate::path_resolver::PathResolver;
use crate::pattern_store::{Pattern, PatternStore};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Where the engine is in its run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Scanning,
    Processing,
    Completed,
    Cancelled,
    Failed,
}

impl EngineState {
    /// True while a run is scanning or processing.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Scanning | Self::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Cooperative cancellation flag shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-run option flags supplied by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Overrides the stored `backup_before_move` setting when set.
    pub backup_before_move: Option<bool>,
}

/// What happened to one file.
#[derive(Debug)]
pub enum MoveStatus {
    Moved {
        target_path: PathBuf,
        backup_path: Option<PathBuf>,
    },
    SkippedNoMatch,
    Failed {
        error: FileError,
        backup_path: Option<PathBuf>,
    },
}

/// Result for a single file of the batch.
#[derive(Debug)]
pub struct MoveOutcome {
    pub filename: String,
    pub status: MoveStatus,
}

impl MoveOutcome {
    pub fn is_moved(&self) -> bool {
        matches!(self.status, MoveStatus::Moved { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, MoveStatus::Failed { .. })
    }

    pub fn target_path(&self) -> Option<&Path> {
        match &self.status {
            MoveStatus::Moved { target_path, .. } => Some(target_path),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FileError> {
        match &self.status {
            MoveStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Everything a finished run reports back.
#[derive(Debug)]
pub struct RunReport {
    pub directory: PathBuf,
    pub pattern_name: String,
    /// Terminal state of the run.
    pub state: EngineState,
    /// Number of files that matched the pattern.
    pub matched: usize,
    /// Outcomes for skipped files first, then processed files in order.
    pub outcomes: Vec<MoveOutcome>,
    /// Set when the run failed before processing.
    pub error: Option<EngineError>,
}

impl RunReport {
    fn new(directory: &Path, pattern_name: &str) -> Self {
        Self {
            directory: directory.to_path_buf(),
            pattern_name: pattern_name.to_string(),
            state: EngineState::Scanning,
            matched: 0,
            outcomes: Vec::new(),
            error: None,
        }
    }

    fn fail(mut self, error: EngineError) -> Self {
        warn!(pattern = %self.pattern_name, %error, "organization failed");
        self.state = EngineState::Failed;
        self.error = Some(error);
        self
    }

    pub fn moved(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_moved()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, MoveStatus::SkippedNoMatch))
            .count()
    }

    /// Matched files that were never reached because the run was cancelled.
    pub fn unprocessed(&self) -> usize {
        self.matched - self.moved() - self.failed()
    }

    /// Moved-file counts per destination folder, relative to the directory.
    pub fn folder_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for target in self.outcomes.iter().filter_map(MoveOutcome::target_path) {
            let folder = target
                .parent()
                .and_then(|p| p.strip_prefix(&self.directory).ok())
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            *counts.entry(folder).or_insert(0) += 1;
        }
        counts
    }
}

/// A move the engine would make, as computed by [`OrganizationEngine::preview`].
#[derive(Debug)]
pub struct PlannedMove {
    pub filename: String,
    pub source_path: PathBuf,
    /// Where the file would go, or why a real run would fail it.
    pub target: FileResult<PathBuf>,
}

impl PlannedMove {
    pub fn target_path(&self) -> Option<&Path> {
        self.target.as_deref().ok()
    }

    pub fn is_failure(&self) -> bool {
        self.target.is_err()
    }
}

/// A run executing on the background worker.
pub struct RunHandle {
    token: CancellationToken,
    state: Arc<Mutex<EngineState>>,
    worker: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Asks the run to stop before its next file.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Waits for the run to finish and returns its report.
    pub fn join(self) -> Result<RunReport, EngineError> {
        self.worker.join().map_err(|panic| {
            *self.state.lock().unwrap_or_else(PoisonError::into_inner) = EngineState::Failed;
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            EngineError::Worker(reason)
        })
    }
}

/// Both required fields must have been captured before a file can be placed.
fn require_fields(fields: &ExtractedFields) -> FileResult<()> {
    if fields.number().is_none() {
        return Err(FileError::MissingField(ExtractedFields::NUMBER));
    }
    if fields.year().is_none() {
        return Err(FileError::MissingField(ExtractedFields::YEAR));
    }
    Ok(())
}

/// Moves the engine to `Failed` if a run unwinds before reaching a final
/// state, e.g. when the progress callback panics.
struct RunGuard<'a> {
    engine: &'a OrganizationEngine,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.engine.lock_state();
        if state.is_active() {
            *state = EngineState::Failed;
        }
    }
}

/// A file that matched and is waiting to be processed.
struct Candidate {
    filename: String,
    file_name: OsString,
    path: PathBuf,
    fields: ExtractedFields,
}

/// Organizes directories with patterns from a shared [`PatternStore`].
///
/// Collaborators are plain values injected at construction; cloning the
/// engine shares its store and run state.
#[derive(Debug, Clone)]
pub struct OrganizationEngine {
    store: Arc<RwLock<PatternStore>>,
    classifier: Classifier,
    resolver: PathResolver,
    backup: BackupManager,
    mover: FileMover,
    state: Arc<Mutex<EngineState>>,
}

impl OrganizationEngine {
    /// Creates an engine with default collaborators.
    pub fn new(store: Arc<RwLock<PatternStore>>) -> Self {
        Self::with_collaborators(
            store,
            Classifier,
            PathResolver,
            BackupManager,
            FileMover::default(),
        )
    }

    pub fn with_collaborators(
        store: Arc<RwLock<PatternStore>>,
        classifier: Classifier,
        resolver: PathResolver,
        backup: BackupManager,
        mover: FileMover,
    ) -> Self {
        Self {
            store,
            classifier,
            resolver,
            backup,
            mover,
            state: Arc::new(Mutex::new(EngineState::Idle)),
        }
    }

    /// Replaces the file mover, e.g. to change the conflict policy.
    pub fn with_file_mover(mut self, mover: FileMover) -> Self {
        self.mover = mover;
        self
    }

    /// Shared handle to the pattern store.
    pub fn store(&self) -> Arc<RwLock<PatternStore>> {
        Arc::clone(&self.store)
    }

    pub fn state(&self) -> EngineState {
        *self.lock_state()
    }

    /// Starts a run on a background worker.
    ///
    /// Fails with [`EngineError::AlreadyRunning`] if a run is active; the
    /// active run is not affected. `progress` receives
    /// `(current, total, message)` after every processed file.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use casesort::{OrganizationEngine, PatternStore, RunOptions};
    /// use std::sync::{Arc, RwLock};
    ///
    /// let store = Arc::new(RwLock::new(PatternStore::load("file_patterns.json")));
    /// let engine = OrganizationEngine::new(store);
    /// let handle = engine.start("/cases/inbox", "ACC", RunOptions::default(), |current, total, message| {
    ///     println!("[{}/{}] {}", current, total, message);
    /// })?;
    /// let report = handle.join()?;
    /// println!("moved {} files", report.moved());
    /// # Ok::<(), casesort::EngineError>(())
    /// ```
    pub fn start<F>(
        &self,
        directory: impl Into<PathBuf>,
        pattern_name: &str,
        options: RunOptions,
        progress: F,
    ) -> Result<RunHandle, EngineError>
    where
        F: FnMut(usize, usize, &str) + Send + 'static,
    {
        self.try_begin()?;

        let directory = directory.into();
        let pattern_name = pattern_name.to_string();
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let engine = self.clone();

        let spawned = thread::Builder::new()
            .name("casesort-worker".to_string())
            .spawn(move || engine.execute(&directory, &pattern_name, options, &worker_token, progress));

        match spawned {
            Ok(worker) => Ok(RunHandle {
                token,
                state: Arc::clone(&self.state),
                worker,
            }),
            Err(e) => {
                self.set_state(EngineState::Idle);
                Err(EngineError::Worker(e.to_string()))
            }
        }
    }

    /// Runs the whole state machine on the calling thread.
    ///
    /// Fails only with [`EngineError::AlreadyRunning`]; every other problem
    /// is described by the returned report.
    pub fn run<F>(
        &self,
        directory: &Path,
        pattern_name: &str,
        options: RunOptions,
        token: &CancellationToken,
        progress: F,
    ) -> Result<RunReport, EngineError>
    where
        F: FnMut(usize, usize, &str),
    {
        self.try_begin()?;
        Ok(self.execute(directory, pattern_name, options, token, progress))
    }

    /// Computes the moves a run would make without touching any file.
    pub fn preview(&self, directory: &Path, pattern_name: &str) -> Result<Vec<PlannedMove>, EngineError> {
        let (pattern, _) = self.snapshot(pattern_name, RunOptions::default())?;
        let compiled = CompiledPattern::new(&pattern)?;
        let (candidates, _) = self.scan(directory, &compiled)?;

        Ok(candidates
            .into_iter()
            .map(|c| PlannedMove {
                target: require_fields(&c.fields).map(|()| {
                    self.resolver
                        .resolve(directory, &pattern, &c.fields)
                        .join(&c.file_name)
                }),
                filename: c.filename,
                source_path: c.path,
            })
            .collect())
    }

    fn execute<F>(
        &self,
        directory: &Path,
        pattern_name: &str,
        options: RunOptions,
        token: &CancellationToken,
        mut progress: F,
    ) -> RunReport
    where
        F: FnMut(usize, usize, &str),
    {
        let _guard = RunGuard { engine: self };
        let mut report = RunReport::new(directory, pattern_name);
        info!(directory = %directory.display(), pattern = %pattern_name, "organization started");

        let setup = self
            .snapshot(pattern_name, options)
            .and_then(|(pattern, backup)| Ok((CompiledPattern::new(&pattern)?, backup)))
            .and_then(|(compiled, backup)| {
                let (candidates, skipped) = self.scan(directory, &compiled)?;
                Ok((compiled, backup, candidates, skipped))
            });
        let (compiled, backup_enabled, candidates, skipped) = match setup {
            Ok(setup) => setup,
            Err(e) => return self.finish(report.fail(e)),
        };

        report.outcomes = skipped;
        report.matched = candidates.len();
        if candidates.is_empty() {
            info!(pattern = %pattern_name, "no files found matching the pattern");
            report.state = EngineState::Completed;
            return self.finish(report);
        }

        self.set_state(EngineState::Processing);
        let total = candidates.len();
        for (index, candidate) in candidates.into_iter().enumerate() {
            if token.is_cancelled() {
                info!(processed = index, total, "organization cancelled");
                report.state = EngineState::Cancelled;
                return self.finish(report);
            }

            let status = self.process_file(directory, compiled.pattern(), &candidate, backup_enabled);
            let message = match &status {
                MoveStatus::Moved { target_path, .. } => {
                    info!(file = %candidate.filename, target = %target_path.display(), "moved file");
                    format!("Moved {}", candidate.filename)
                }
                MoveStatus::Failed { error, .. } => {
                    warn!(file = %candidate.filename, %error, "failed to organize file");
                    format!("Failed {}: {}", candidate.filename, error)
                }
                MoveStatus::SkippedNoMatch => format!("Skipped {}", candidate.filename),
            };
            report.outcomes.push(MoveOutcome {
                filename: candidate.filename,
                status,
            });
            progress(index + 1, total, &message);
        }

        info!(
            moved = report.moved(),
            failed = report.failed(),
            "organization completed"
        );
        report.state = EngineState::Completed;
        self.finish(report)
    }

    /// Backs up (if enabled) and relocates one file.
    fn process_file(
        &self,
        directory: &Path,
        pattern: &Pattern,
        candidate: &Candidate,
        backup_enabled: bool,
    ) -> MoveStatus {
        let backup_path = if backup_enabled {
            match self.backup.backup(&candidate.path) {
                Ok(path) => Some(path),
                Err(error) => {
                    return MoveStatus::Failed {
                        error,
                        backup_path: None,
                    };
                }
            }
        } else {
            None
        };

        match self.relocate(directory, pattern, candidate) {
            Ok(target_path) => MoveStatus::Moved {
                target_path,
                backup_path,
            },
            Err(error) => MoveStatus::Failed { error, backup_path },
        }
    }

    fn relocate(&self, directory: &Path, pattern: &Pattern, candidate: &Candidate) -> FileResult<PathBuf> {
        require_fields(&candidate.fields)?;

        let target_dir = self.resolver.resolve(directory, pattern, &candidate.fields);
        self.mover.ensure_directory(&target_dir)?;
        let target_path = target_dir.join(&candidate.file_name);
        self.mover.move_file(&candidate.path, &target_path)?;
        Ok(target_path)
    }

    /// Copies what a run needs out of the store so it stays untouched.
    fn snapshot(&self, pattern_name: &str, options: RunOptions) -> Result<(Pattern, bool), EngineError> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let pattern = store
            .get(pattern_name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownPattern(pattern_name.to_string()))?;
        let backup = options
            .backup_before_move
            .unwrap_or(store.settings().backup_before_move);
        Ok((pattern, backup))
    }

    /// Lists plain files directly under `directory` and splits them into
    /// matches and skipped outcomes. Backup files are never candidates.
    fn scan(
        &self,
        directory: &Path,
        compiled: &CompiledPattern,
    ) -> Result<(Vec<Candidate>, Vec<MoveOutcome>), EngineError> {
        let entries = fs::read_dir(directory).map_err(|source| EngineError::DirectoryUnreadable {
            path: directory.to_path_buf(),
            source,
        })?;

        let mut candidates = Vec::new();
        let mut skipped = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    debug!(directory = %directory.display(), %error, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            // Follows symlinks, so a link to a case file is a candidate.
            if path.is_file() {
                if BackupManager::is_backup(&path) {
                    debug!(file = %path.display(), "ignoring backup file");
                    continue;
                }

                let file_name = entry.file_name();
                let filename = file_name.to_string_lossy().to_string();
                match self.classifier.classify_compiled(&filename, compiled) {
                    Classification::Matched(fields) => candidates.push(Candidate {
                        filename,
                        file_name,
                        path,
                        fields,
                    }),
                    Classification::NoMatch => skipped.push(MoveOutcome {
                        filename,
                        status: MoveStatus::SkippedNoMatch,
                    }),
                }
            }
        }
        debug!(matched = candidates.len(), skipped = skipped.len(), "scan finished");
        Ok((candidates, skipped))
    }

    fn try_begin(&self) -> Result<(), EngineError> {
        let mut state = self.lock_state();
        if state.is_active() {
            return Err(EngineError::AlreadyRunning);
        }
        *state = EngineState::Scanning;
        Ok(())
    }

    fn finish(&self, report: RunReport) -> RunReport {
        self.set_state(report.state);
        report
    }

    fn set_state(&self, state: EngineState) {
        *self.lock_state() = state;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_mover::ConflictPolicy;
    use crate::pattern_store::PatternDocument;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn engine_for(dir: &TempDir) -> OrganizationEngine {
        let mut document = PatternDocument::default();
        document.settings.backup_before_move = false;
        let store = PatternStore::from_document(dir.path().join("file_patterns.json"), document);
        OrganizationEngine::new(Arc::new(RwLock::new(store)))
    }

    fn write_files(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), format!("content of {}", name)).expect("Failed to write file");
        }
    }

    #[test]
    fn test_run_moves_matching_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        write_files(base, &["ACC134.23.pdf", "ACC7.21.pdf", "notes.txt"]);

        let engine = engine_for(&temp_dir);
        let report = engine
            .run(base, "ACC", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected");

        assert_eq!(report.state, EngineState::Completed);
        assert_eq!(engine.state(), EngineState::Completed);
        assert_eq!(report.matched, 2);
        assert_eq!(report.moved(), 2);
        assert_eq!(report.skipped(), 1);
        assert!(base.join("ACC134.2023").join("ACC134.23.pdf").exists());
        assert!(base.join("ACC7.2021").join("ACC7.21.pdf").exists());
        assert!(base.join("notes.txt").exists());
    }

    #[test]
    fn test_progress_reported_after_every_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        write_files(base, &["ACC1.21", "ACC2.22", "ACC3.23"]);

        let mut calls = Vec::new();
        engine_for(&temp_dir)
            .run(base, "ACC", RunOptions::default(), &CancellationToken::new(), |current, total, _| {
                calls.push((current, total))
            })
            .expect("Run rejected");

        assert_eq!(calls, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_unknown_pattern_fails_run() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write_files(temp_dir.path(), &["ACC1.21"]);

        let engine = engine_for(&temp_dir);
        let report = engine
            .run(temp_dir.path(), "NOPE", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected");

        assert_eq!(report.state, EngineState::Failed);
        assert!(matches!(report.error, Some(EngineError::UnknownPattern(_))));
        assert!(report.outcomes.is_empty());
        assert!(temp_dir.path().join("ACC1.21").exists());
    }

    #[test]
    fn test_unreadable_directory_fails_run() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let engine = engine_for(&temp_dir);
        let report = engine
            .run(
                &temp_dir.path().join("missing"),
                "ACC",
                RunOptions::default(),
                &CancellationToken::new(),
                |_, _, _| {},
            )
            .expect("Run rejected");

        assert_eq!(report.state, EngineState::Failed);
        assert!(matches!(report.error, Some(EngineError::DirectoryUnreadable { .. })));
    }

    #[test]
    fn test_stored_matcher_that_no_longer_compiles_fails_run() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut document = PatternDocument::default();
        let broken = Pattern::new("BROKEN", r"ACC(\d+", "{number}/{year}", "Hand edited");
        document.patterns.insert("BROKEN".to_string(), broken);
        let store = PatternStore::from_document(temp_dir.path().join("p.json"), document);
        let engine = OrganizationEngine::new(Arc::new(RwLock::new(store)));

        let report = engine
            .run(temp_dir.path(), "BROKEN", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected");

        assert!(matches!(report.error, Some(EngineError::InvalidPattern { .. })));
    }

    #[test]
    fn test_no_matches_completes_with_empty_result() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write_files(temp_dir.path(), &["readme.txt"]);

        let report = engine_for(&temp_dir)
            .run(temp_dir.path(), "ACC", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected");

        assert_eq!(report.state, EngineState::Completed);
        assert_eq!(report.matched, 0);
        assert_eq!(report.moved(), 0);
    }

    #[test]
    fn test_cancel_before_first_file_leaves_everything() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write_files(temp_dir.path(), &["ACC1.21", "ACC2.22"]);
        let token = CancellationToken::new();
        token.cancel();

        let report = engine_for(&temp_dir)
            .run(temp_dir.path(), "ACC", RunOptions::default(), &token, |_, _, _| {})
            .expect("Run rejected");

        assert_eq!(report.state, EngineState::Cancelled);
        assert_eq!(report.moved(), 0);
        assert_eq!(report.unprocessed(), 2);
        assert!(temp_dir.path().join("ACC1.21").exists());
        assert!(temp_dir.path().join("ACC2.22").exists());
    }

    #[test]
    fn test_missing_year_group_fails_that_file_only() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut document = PatternDocument::default();
        document.settings.backup_before_move = false;
        document.patterns.insert(
            "ONE".to_string(),
            Pattern::new("ONE", r"ONE(\d+)", "{number}/{year}", "One group"),
        );
        let store = PatternStore::from_document(temp_dir.path().join("p.json"), document);
        let engine = OrganizationEngine::new(Arc::new(RwLock::new(store)));
        write_files(temp_dir.path(), &["ONE5.txt"]);

        let report = engine
            .run(temp_dir.path(), "ONE", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected");

        assert_eq!(report.state, EngineState::Completed);
        assert!(matches!(
            report.outcomes[0].error(),
            Some(FileError::MissingField("year"))
        ));
        assert!(temp_dir.path().join("ONE5.txt").exists());
    }

    #[test]
    fn test_destination_exists_is_per_file_failure() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        write_files(base, &["ACC1.21"]);
        fs::create_dir(base.join("ACC1.2021")).unwrap();
        fs::write(base.join("ACC1.2021").join("ACC1.21"), "already here").unwrap();

        let report = engine_for(&temp_dir)
            .run(base, "ACC", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected");

        assert_eq!(report.state, EngineState::Completed);
        assert!(matches!(
            report.outcomes[0].error(),
            Some(FileError::DestinationExists(_))
        ));
        assert!(base.join("ACC1.21").exists());
    }

    #[test]
    fn test_overwrite_policy_replaces_destination() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        write_files(base, &["ACC1.21"]);
        fs::create_dir(base.join("ACC1.2021")).unwrap();
        fs::write(base.join("ACC1.2021").join("ACC1.21"), "already here").unwrap();

        let engine = engine_for(&temp_dir).with_file_mover(FileMover::new(ConflictPolicy::Overwrite));
        let report = engine
            .run(base, "ACC", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected");

        assert_eq!(report.moved(), 1);
        assert_eq!(
            fs::read_to_string(base.join("ACC1.2021").join("ACC1.21")).unwrap(),
            "content of ACC1.21"
        );
    }

    #[test]
    fn test_run_options_override_backup_setting() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write_files(temp_dir.path(), &["ACC1.21"]);

        let options = RunOptions {
            backup_before_move: Some(true),
        };
        let report = engine_for(&temp_dir)
            .run(temp_dir.path(), "ACC", options, &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected");

        assert_eq!(report.moved(), 1);
        assert!(temp_dir.path().join("ACC1.21.bak").exists());
    }

    #[test]
    fn test_preview_does_not_touch_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        write_files(base, &["ACC134.23.pdf", "other.txt"]);

        let engine = engine_for(&temp_dir);
        let plan = engine.preview(base, "ACC").expect("Preview failed");

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].filename, "ACC134.23.pdf");
        assert_eq!(
            plan[0].target_path(),
            Some(base.join("ACC134.2023").join("ACC134.23.pdf").as_path())
        );
        assert!(base.join("ACC134.23.pdf").exists());
        assert!(!base.join("ACC134.2023").exists());
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_preview_marks_missing_fields_as_failures() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut document = PatternDocument::default();
        document.patterns.insert(
            "ONE".to_string(),
            Pattern::new("ONE", r"ONE(\d+)", "{number}/{year}", "One group"),
        );
        let store = PatternStore::from_document(temp_dir.path().join("p.json"), document);
        let engine = OrganizationEngine::new(Arc::new(RwLock::new(store)));
        write_files(temp_dir.path(), &["ONE5.txt"]);

        let plan = engine.preview(temp_dir.path(), "ONE").expect("Preview failed");

        assert_eq!(plan.len(), 1);
        assert!(plan[0].is_failure());
        assert!(plan[0].target_path().is_none());
        assert!(matches!(plan[0].target, Err(FileError::MissingField("year"))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_case_file_is_a_candidate() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage = TempDir::new().expect("Failed to create temp directory");
        fs::write(storage.path().join("scan.pdf"), "scanned").unwrap();
        std::os::unix::fs::symlink(storage.path().join("scan.pdf"), temp_dir.path().join("ACC3.23.pdf"))
            .unwrap();

        let report = engine_for(&temp_dir)
            .run(temp_dir.path(), "ACC", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected");

        assert_eq!(report.matched, 1);
        assert_eq!(report.moved(), 1);
        let moved = temp_dir.path().join("ACC3.2023").join("ACC3.23.pdf");
        assert_eq!(fs::read_to_string(moved).unwrap(), "scanned");
    }

    #[test]
    fn test_panicking_progress_callback_leaves_engine_failed() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write_files(temp_dir.path(), &["ACC1.21", "ACC2.22"]);
        let engine = engine_for(&temp_dir);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            engine.run(temp_dir.path(), "ACC", RunOptions::default(), &CancellationToken::new(), |_, _, _| {
                panic!("progress sink closed")
            })
        }));

        assert!(result.is_err());
        assert_eq!(engine.state(), EngineState::Failed);
        let next = engine
            .run(temp_dir.path(), "ACC", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected after a panicked run");
        assert_eq!(next.state, EngineState::Completed);
        assert_eq!(next.moved(), 1);
    }

    #[test]
    fn test_worker_panic_without_join_leaves_engine_failed() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write_files(temp_dir.path(), &["ACC1.21", "ACC2.22"]);
        let engine = engine_for(&temp_dir);

        let handle = engine
            .start(temp_dir.path(), "ACC", RunOptions::default(), |_, _, _| {
                panic!("progress sink closed")
            })
            .expect("Start failed");
        while !handle.is_finished() {
            std::thread::yield_now();
        }
        drop(handle);

        assert_eq!(engine.state(), EngineState::Failed);
        let next = engine
            .start(temp_dir.path(), "ACC", RunOptions::default(), |_, _, _| {})
            .expect("Start rejected after a panicked run");
        assert_eq!(next.join().expect("Worker failed").moved(), 1);
    }

    #[test]
    fn test_start_rejects_second_run_while_active() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        write_files(temp_dir.path(), &["ACC1.21", "ACC2.22"]);
        let engine = engine_for(&temp_dir);

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handle = engine
            .start(temp_dir.path(), "ACC", RunOptions::default(), move |_, _, _| {
                let _ = release_rx.recv();
            })
            .expect("First start failed");

        assert!(engine.state().is_active());
        let second = engine.start(temp_dir.path(), "ACC", RunOptions::default(), |_, _, _| {});
        assert!(matches!(second, Err(EngineError::AlreadyRunning)));

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        let report = handle.join().expect("Worker failed");

        assert_eq!(report.state, EngineState::Completed);
        assert_eq!(report.moved(), 2);
        assert_eq!(engine.state(), EngineState::Completed);
    }

    #[test]
    fn test_new_run_allowed_after_terminal_state() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let engine = engine_for(&temp_dir);

        let first = engine
            .run(temp_dir.path(), "NOPE", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected");
        assert_eq!(first.state, EngineState::Failed);

        let second = engine
            .run(temp_dir.path(), "ACC", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected after a failed run");
        assert_eq!(second.state, EngineState::Completed);
    }

    #[test]
    fn test_folder_counts() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        write_files(base, &["ACC1.21.pdf", "ACC1.21 annex.pdf", "ACC2.22.pdf"]);

        let report = engine_for(&temp_dir)
            .run(base, "ACC", RunOptions::default(), &CancellationToken::new(), |_, _, _| {})
            .expect("Run rejected");

        let counts = report.folder_counts();
        assert_eq!(counts.get("ACC1.2021"), Some(&2));
        assert_eq!(counts.get("ACC2.2022"), Some(&1));
    }
}
