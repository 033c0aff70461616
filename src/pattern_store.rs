//! Named pattern definitions and their persisted document.
//!
//! The store keeps every pattern and the run settings in one document, saved
//! as JSON or, when the path ends in `.toml`, as TOML:
//!
//! ```json
//! {
//!   "patterns": {
//!     "ACC": {
//!       "matcher": "ACC(\\d+)\\.(\\d+)",
//!       "destination_template": "ACC{number}.{year}",
//!       "description": "Accident case files",
//!       "sort_fields": ["number", "year"]
//!     }
//!   },
//!   "settings": {
//!     "create_year_folders": true,
//!     "sort_by_year": true,
//!     "backup_before_move": true,
//!     "log_level": "info"
//!   }
//! }
//! ```
//!
//! Older documents that use `regex`, `folder_format`, `sort_by` and
//! `default_settings` are read as well.

use crate::error::{LoadWarning, StoreError, StoreResult, ValidationError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default file name of the pattern document.
pub const DEFAULT_PATTERN_FILE: &str = "file_patterns.json";

/// Placeholders every destination template must contain.
pub const REQUIRED_PLACEHOLDERS: [&str; 2] = ["{number}", "{year}"];

/// A named classification rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    /// Key of the pattern in the document; not serialized inside the entry.
    #[serde(skip)]
    pub name: String,

    /// Regex applied to file names. Group 1 is the case number, group 2 the
    /// two-digit year.
    #[serde(alias = "regex")]
    pub matcher: String,

    /// Relative destination path with `{number}` and `{year}` placeholders.
    #[serde(alias = "folder_format")]
    pub destination_template: String,

    pub description: String,

    /// Informational sort order shown to users; not used when moving files.
    #[serde(alias = "sort_by", default = "default_sort_fields")]
    pub sort_fields: Vec<String>,
}

fn default_sort_fields() -> Vec<String> {
    vec!["number".to_string(), "year".to_string()]
}

impl Pattern {
    /// Creates a pattern with the default sort fields.
    pub fn new(
        name: impl Into<String>,
        matcher: impl Into<String>,
        destination_template: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            matcher: matcher.into(),
            destination_template: destination_template.into(),
            description: description.into(),
            sort_fields: default_sort_fields(),
        }
    }

    /// Checks the pattern against every rule a stored pattern must satisfy.
    ///
    /// Rules are checked in order: name, description, matcher, placeholders.
    /// The first violation is returned.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.description.trim().is_empty() {
            return Err(ValidationError::EmptyDescription);
        }
        Regex::new(&self.matcher).map_err(|e| ValidationError::InvalidMatcher {
            pattern: self.matcher.clone(),
            reason: e.to_string(),
        })?;
        for placeholder in REQUIRED_PLACEHOLDERS {
            if !self.destination_template.contains(placeholder) {
                return Err(ValidationError::MissingPlaceholder {
                    template: self.destination_template.clone(),
                    placeholder,
                });
            }
        }
        Ok(())
    }
}

/// Run settings stored next to the patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub create_year_folders: bool,
    #[serde(default = "default_true")]
    pub sort_by_year: bool,
    #[serde(default = "default_true")]
    pub backup_before_move: bool,
    /// Default log filter for the command-line tool.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            create_year_folders: true,
            sort_by_year: true,
            backup_before_move: true,
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Names of the boolean settings, in document order.
    pub const NAMES: [&'static str; 3] = ["create_year_folders", "sort_by_year", "backup_before_move"];

    fn flag(&self, name: &str) -> Option<bool> {
        match name {
            "create_year_folders" => Some(self.create_year_folders),
            "sort_by_year" => Some(self.sort_by_year),
            "backup_before_move" => Some(self.backup_before_move),
            _ => None,
        }
    }

    fn flag_mut(&mut self, name: &str) -> Option<&mut bool> {
        match name {
            "create_year_folders" => Some(&mut self.create_year_folders),
            "sort_by_year" => Some(&mut self.sort_by_year),
            "backup_before_move" => Some(&mut self.backup_before_move),
            _ => None,
        }
    }
}

/// The persisted document: patterns keyed by name, plus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternDocument {
    #[serde(default)]
    pub patterns: BTreeMap<String, Pattern>,
    #[serde(default, alias = "default_settings")]
    pub settings: Settings,
}

impl Default for PatternDocument {
    fn default() -> Self {
        let patterns = [
            Pattern::new("ACC", r"ACC(\d+)\.(\d+)", "ACC{number}.{year}", "Accident case files"),
            Pattern::new(
                "HREPN",
                r"HREPN(\d+)\.(\d+)",
                "HREPN{number}.{year}",
                "Human rights enforcement case files",
            ),
            Pattern::new(
                "HRER",
                r"HRER(\d+)\.(\d+)",
                "HRER{number}.{year}",
                "Human rights enforcement report files",
            ),
        ]
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect();

        Self {
            patterns,
            settings: Settings::default(),
        }
    }
}

/// On-disk encoding of the document, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }

    fn parse(self, content: &str) -> Result<PatternDocument, String> {
        match self {
            Self::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Self::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        }
    }

    fn render(self, document: &PatternDocument) -> Result<String, String> {
        match self {
            Self::Json => serde_json::to_string_pretty(document).map_err(|e| e.to_string()),
            Self::Toml => toml::to_string_pretty(document).map_err(|e| e.to_string()),
        }
    }
}

/// Holds the pattern document and keeps its backing file in sync.
#[derive(Debug, Clone)]
pub struct PatternStore {
    path: PathBuf,
    document: PatternDocument,
}

impl PatternStore {
    /// Loads the document at `path`, logging anything wrong with it.
    ///
    /// A missing or unparsable file yields the built-in defaults, and
    /// patterns that break a validation rule are left out. This never fails.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let (store, warnings) = Self::open(path);
        for warning in &warnings {
            warn!(path = %store.path.display(), "{}", warning);
        }
        store
    }

    /// Loads the document at `path` and returns the problems found instead
    /// of logging them, for callers that set up logging afterwards.
    pub fn open(path: impl Into<PathBuf>) -> (Self, Vec<LoadWarning>) {
        let path = path.into();
        let mut warnings = Vec::new();
        let document = match fs::read_to_string(&path) {
            Ok(content) => match DocumentFormat::for_path(&path).parse(&content) {
                Ok(document) => {
                    debug!(path = %path.display(), "loaded pattern document");
                    Some(document)
                }
                Err(reason) => {
                    warnings.push(LoadWarning::UnreadableDocument {
                        path: path.clone(),
                        reason,
                    });
                    None
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no pattern document, using defaults");
                None
            }
            Err(e) => {
                warnings.push(LoadWarning::UnreadableDocument {
                    path: path.clone(),
                    reason: e.to_string(),
                });
                None
            }
        };

        let mut store = Self::from_document(path, document.unwrap_or_default());
        store.document.patterns.retain(|name, pattern| match pattern.validate() {
            Ok(()) => true,
            Err(source) => {
                warnings.push(LoadWarning::InvalidPattern {
                    name: name.clone(),
                    source,
                });
                false
            }
        });
        (store, warnings)
    }

    /// Wraps an in-memory document that will be saved to `path`.
    pub fn from_document(path: impl Into<PathBuf>, mut document: PatternDocument) -> Self {
        for (name, pattern) in document.patterns.iter_mut() {
            pattern.name = name.clone();
        }
        Self {
            path: path.into(),
            document,
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &PatternDocument {
        &self.document
    }

    /// Writes the document to the backing file.
    pub fn save(&self) -> StoreResult<()> {
        let content = DocumentFormat::for_path(&self.path)
            .render(&self.document)
            .map_err(StoreError::Serialize)?;
        fs::write(&self.path, content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "saved pattern document");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Pattern> {
        self.document.patterns.get(name)
    }

    /// All patterns keyed by name.
    pub fn list_all(&self) -> &BTreeMap<String, Pattern> {
        &self.document.patterns
    }

    /// Validates `pattern` and stores it under `name`, then persists.
    ///
    /// Nothing changes, in memory or on disk, unless validation passes and
    /// the document is written successfully.
    pub fn update(&mut self, name: &str, mut pattern: Pattern) -> StoreResult<()> {
        pattern.name = name.trim().to_string();
        pattern.description = pattern.description.trim().to_string();
        pattern.validate()?;

        let previous = self
            .document
            .patterns
            .insert(pattern.name.clone(), pattern.clone());
        if let Err(e) = self.save() {
            match previous {
                Some(old) => self.document.patterns.insert(pattern.name.clone(), old),
                None => self.document.patterns.remove(&pattern.name),
            };
            return Err(e);
        }
        info!(pattern = %pattern.name, "pattern saved");
        Ok(())
    }

    /// Removes the pattern if present and persists. Absent names are a no-op.
    pub fn delete(&mut self, name: &str) -> StoreResult<()> {
        let Some(removed) = self.document.patterns.remove(name) else {
            return Ok(());
        };
        if let Err(e) = self.save() {
            self.document.patterns.insert(name.to_string(), removed);
            return Err(e);
        }
        info!(pattern = %name, "pattern deleted");
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.document.settings
    }

    pub fn get_setting(&self, name: &str) -> Option<bool> {
        self.document.settings.flag(name)
    }

    /// Assigns a boolean setting and persists.
    pub fn update_setting(&mut self, name: &str, value: bool) -> StoreResult<()> {
        let flag = self
            .document
            .settings
            .flag_mut(name)
            .ok_or_else(|| StoreError::UnknownSetting(name.to_string()))?;
        let previous = std::mem::replace(flag, value);
        if let Err(e) = self.save() {
            if let Some(flag) = self.document.settings.flag_mut(name) {
                *flag = previous;
            }
            return Err(e);
        }
        info!(setting = %name, value, "setting updated");
        Ok(())
    }
}
