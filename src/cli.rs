//! Command-line interface module for casesort.
//!
//! This module handles all CLI-related functionality including:
//! - Argument parsing
//! - Organization runs, real and dry
//! - Pattern and settings management
//! - Restoring backups

use crate::backup::BackupManager;
use crate::engine::{MoveStatus, OrganizationEngine, RunOptions, RunReport};
use crate::file_mover::{ConflictPolicy, FileMover};
use crate::logging::{self, LogConfig};
use crate::output::OutputFormatter;
use crate::pattern_store::{DEFAULT_PATTERN_FILE, Pattern, PatternStore, Settings};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// casesort - organize case files into folders named after their case number and year
#[derive(Parser, Debug)]
#[command(name = "casesort")]
#[command(version)]
#[command(about = "Organize case files into folders computed from their names", long_about = None)]
pub struct Cli {
    /// Pattern document (JSON, or TOML with a .toml extension)
    #[arg(short, long, default_value = DEFAULT_PATTERN_FILE, global = true)]
    pub config: PathBuf,

    /// Show the full log on the console
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory for log files
    #[arg(long, default_value = "logs", global = true)]
    pub log_dir: PathBuf,

    /// Do not write a log file
    #[arg(long, global = true)]
    pub no_log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Move files matching a pattern into their destination folders
    Organize {
        /// Directory containing the files to organize
        directory: PathBuf,

        /// Name of the pattern to apply
        #[arg(short, long)]
        pattern: String,

        /// Back up each file before moving it (overrides the stored setting)
        #[arg(long, conflicts_with = "no_backup")]
        backup: bool,

        /// Do not back up files (overrides the stored setting)
        #[arg(long)]
        no_backup: bool,

        /// Show what would be moved without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Replace files that already exist at the destination
        #[arg(long)]
        overwrite: bool,
    },

    /// Manage patterns
    Patterns {
        #[command(subcommand)]
        action: PatternCommand,
    },

    /// Read or change stored settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },

    /// Copy a .bak file back over its original
    Restore {
        /// Backup file to restore
        backup: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum PatternCommand {
    /// List all patterns
    List,

    /// Show one pattern in full
    Show { name: String },

    /// Add a pattern, or replace an existing one
    Add {
        name: String,

        /// Regex; group 1 is the case number, group 2 the two-digit year
        #[arg(long)]
        matcher: String,

        /// Destination template with {number} and {year}
        #[arg(long)]
        template: String,

        #[arg(long)]
        description: String,

        /// Informational sort fields
        #[arg(long = "sort-field", default_values = ["number", "year"])]
        sort_fields: Vec<String>,
    },

    /// Remove a pattern
    Remove { name: String },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Show all settings
    List,

    /// Show one setting
    Get { name: String },

    /// Change a boolean setting
    Set {
        name: String,
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
}

impl Cli {
    /// Logging setup for this invocation. The stored `log_level` applies
    /// unless `--verbose` asks for debug output.
    pub fn log_config(&self, settings: &Settings) -> LogConfig {
        LogConfig {
            level: if self.verbose {
                "debug".to_string()
            } else {
                settings.log_level.clone()
            },
            verbose: self.verbose,
            log_dir: (!self.no_log_file).then(|| self.log_dir.clone()),
        }
    }
}

/// Opens the pattern store named by `--config` and installs logging from its
/// settings.
///
/// Problems with the document are reported once logging is in place, so they
/// reach both the console and the log file.
pub fn open_store(cli: &Cli) -> PatternStore {
    let (store, warnings) = PatternStore::open(&cli.config);

    match logging::init(&cli.log_config(store.settings())) {
        Ok(Some(path)) => debug!(log_file = %path.display(), "logging to file"),
        Ok(None) => {}
        Err(e) => OutputFormatter::warning(&format!("Could not open log file: {}", e)),
    }

    for warning in &warnings {
        warn!(path = %store.path().display(), "{}", warning);
        OutputFormatter::warning(&warning.to_string());
    }
    store
}

/// Runs a parsed command against `store`.
///
/// # Examples
///
/// ```no_run
/// use casesort::cli::{Cli, run_cli};
/// use casesort::PatternStore;
/// use clap::Parser;
///
/// let cli = Cli::parse_from(["casesort", "organize", "/cases/inbox", "--pattern", "ACC"]);
/// let store = PatternStore::load(&cli.config);
/// if let Err(e) = run_cli(&cli, store) {
///     eprintln!("Error: {}", e);
/// }
/// ```
pub fn run_cli(cli: &Cli, store: PatternStore) -> Result<(), String> {
    match &cli.command {
        Command::Organize {
            directory,
            pattern,
            backup,
            no_backup,
            dry_run,
            overwrite,
        } => {
            let options = RunOptions {
                backup_before_move: match (*backup, *no_backup) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            };
            let policy = if *overwrite {
                ConflictPolicy::Overwrite
            } else {
                ConflictPolicy::Fail
            };
            let engine = OrganizationEngine::new(Arc::new(RwLock::new(store)))
                .with_file_mover(FileMover::new(policy));
            if *dry_run {
                organize_dry_run(&engine, directory, pattern)
            } else {
                organize(&engine, directory, pattern, options)
            }
        }
        Command::Patterns { action } => manage_patterns(store, action),
        Command::Settings { action } => manage_settings(store, action),
        Command::Restore { backup } => restore_backup(backup),
    }
}

/// Organizes `directory` with the named pattern, showing a progress bar.
fn organize(
    engine: &OrganizationEngine,
    directory: &Path,
    pattern: &str,
    options: RunOptions,
) -> Result<(), String> {
    OutputFormatter::info(&format!(
        "Organizing contents of {} with pattern '{}'",
        directory.display(),
        pattern
    ));

    let pb = OutputFormatter::create_progress_bar(0);
    let progress_bar = pb.clone();
    let handle = engine
        .start(directory, pattern, options, move |current, total, message| {
            progress_bar.set_length(total as u64);
            progress_bar.set_position(current as u64);
            progress_bar.set_message(message.to_string());
        })
        .map_err(|e| e.to_string())?;
    let report = handle.join().map_err(|e| e.to_string())?;
    pb.finish_and_clear();

    print_report(&report)
}

/// Prints per-file results and the summary; errors only for a failed run.
fn print_report(report: &RunReport) -> Result<(), String> {
    if let Some(error) = &report.error {
        return Err(error.to_string());
    }
    if report.matched == 0 {
        OutputFormatter::warning("No files found matching the pattern.");
        return Ok(());
    }

    for outcome in &report.outcomes {
        match &outcome.status {
            MoveStatus::Moved {
                target_path,
                backup_path,
            } => {
                let folder = target_path
                    .parent()
                    .and_then(|p| p.strip_prefix(&report.directory).ok())
                    .unwrap_or(target_path.as_path());
                OutputFormatter::success(&format!("{} → {}/", outcome.filename, folder.display()));
                if let Some(backup) = backup_path {
                    println!("   backup: {}", backup.display());
                }
            }
            MoveStatus::Failed { error, .. } => {
                OutputFormatter::error(&format!("{}: {}", outcome.filename, error));
            }
            MoveStatus::SkippedNoMatch => {}
        }
    }

    OutputFormatter::summary_table(&report.folder_counts(), report.moved());

    if report.unprocessed() > 0 {
        OutputFormatter::warning(&format!(
            "Cancelled: {} matching files were left in place.",
            report.unprocessed()
        ));
    }
    if report.failed() > 0 {
        OutputFormatter::warning(&format!(
            "{} files could not be organized. Please review errors above.",
            report.failed()
        ));
    } else {
        OutputFormatter::success("Organization complete!");
    }
    Ok(())
}

/// Shows where each matching file would go without moving anything.
fn organize_dry_run(engine: &OrganizationEngine, directory: &Path, pattern: &str) -> Result<(), String> {
    OutputFormatter::dry_run_notice(&format!("Analyzing contents of: {}", directory.display()));

    let plan = engine.preview(directory, pattern).map_err(|e| e.to_string())?;
    if plan.is_empty() {
        OutputFormatter::warning("No files found matching the pattern.");
        return Ok(());
    }

    let mut folder_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut planned_moves = 0;
    for planned in &plan {
        println!(" - {}", planned.filename);
        match &planned.target {
            Ok(target_path) => {
                let folder = target_path
                    .parent()
                    .and_then(|p| p.strip_prefix(directory).ok())
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                println!("   → Would move to {}/", folder);
                *folder_counts.entry(folder).or_insert(0) += 1;
                planned_moves += 1;
            }
            Err(error) => OutputFormatter::error(&format!("   Would fail: {}", error)),
        }
    }

    OutputFormatter::summary_table(&folder_counts, planned_moves);
    OutputFormatter::dry_run_notice("No files were modified.");
    Ok(())
}

fn manage_patterns(mut store: PatternStore, action: &PatternCommand) -> Result<(), String> {
    match action {
        PatternCommand::List => {
            OutputFormatter::header("PATTERNS");
            for (name, pattern) in store.list_all() {
                println!("{:<12} {}", name, pattern.description);
            }
            Ok(())
        }
        PatternCommand::Show { name } => {
            let pattern = store
                .get(name)
                .ok_or_else(|| format!("Pattern '{}' not found", name))?;
            println!("name:        {}", pattern.name);
            println!("description: {}", pattern.description);
            println!("matcher:     {}", pattern.matcher);
            println!("destination: {}", pattern.destination_template);
            println!("sort fields: {}", pattern.sort_fields.join(", "));
            Ok(())
        }
        PatternCommand::Add {
            name,
            matcher,
            template,
            description,
            sort_fields,
        } => {
            let mut pattern = Pattern::new(name.as_str(), matcher.as_str(), template.as_str(), description.as_str());
            pattern.sort_fields = sort_fields.clone();
            store.update(name, pattern).map_err(|e| e.to_string())?;
            OutputFormatter::success(&format!("Pattern '{}' saved to {}", name, store.path().display()));
            Ok(())
        }
        PatternCommand::Remove { name } => {
            if store.get(name).is_none() {
                OutputFormatter::warning(&format!("Pattern '{}' does not exist", name));
                return Ok(());
            }
            store.delete(name).map_err(|e| e.to_string())?;
            OutputFormatter::success(&format!("Pattern '{}' deleted", name));
            Ok(())
        }
    }
}

fn manage_settings(mut store: PatternStore, action: &SettingsCommand) -> Result<(), String> {
    match action {
        SettingsCommand::List => {
            OutputFormatter::header("SETTINGS");
            for name in Settings::NAMES {
                if let Some(value) = store.get_setting(name) {
                    println!("{:<20} {}", name, value);
                }
            }
            println!("{:<20} {}", "log_level", store.settings().log_level);
            Ok(())
        }
        SettingsCommand::Get { name } => {
            let value = store
                .get_setting(name)
                .ok_or_else(|| format!("Unknown setting '{}'", name))?;
            println!("{}", value);
            Ok(())
        }
        SettingsCommand::Set { name, value } => {
            store.update_setting(name, *value).map_err(|e| e.to_string())?;
            OutputFormatter::success(&format!("{} = {}", name, value));
            Ok(())
        }
    }
}

fn restore_backup(backup: &Path) -> Result<(), String> {
    let restored = BackupManager.restore(backup).map_err(|e| e.to_string())?;
    OutputFormatter::success(&format!("Restored {}", restored.display()));
    Ok(())
}
