//! Filename classification against a pattern's matcher.
//!
//! Matching follows prefix semantics: the matcher must match at the start of
//! the file name but need not consume all of it, so `ACC(\d+)\.(\d+)` accepts
//! `ACC134.23 statement.pdf`.
//!
//! # Examples
//!
//! ```
//! use casesort::classifier::{Classification, Classifier};
//! use casesort::pattern_store::Pattern;
//!
//! let pattern = Pattern::new("ACC", r"ACC(\d+)\.(\d+)", "ACC{number}.{year}", "Accidents");
//! match Classifier.classify("ACC134.23.pdf", &pattern).unwrap() {
//!     Classification::Matched(fields) => {
//!         assert_eq!(fields.number(), Some("134"));
//!         assert_eq!(fields.year(), Some("2023"));
//!     }
//!     Classification::NoMatch => unreachable!(),
//! }
//! ```

use crate::error::EngineError;
use crate::pattern_store::Pattern;
use regex::Regex;
use std::collections::BTreeMap;

/// Prefix turned onto a two-digit year. Records from before 2000 come out
/// wrong; existing folder layouts depend on it.
pub const CENTURY_PREFIX: &str = "20";

/// Fields pulled out of a matched file name, keyed by placeholder name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    values: BTreeMap<String, String>,
}

impl ExtractedFields {
    pub const NUMBER: &'static str = "number";
    pub const YEAR: &'static str = "year";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn number(&self) -> Option<&str> {
        self.get(Self::NUMBER)
    }

    pub fn year(&self) -> Option<&str> {
        self.get(Self::YEAR)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ExtractedFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

/// Outcome of matching one file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Matched(ExtractedFields),
    NoMatch,
}

impl Classification {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// A pattern's matcher compiled once for a whole batch.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pattern: Pattern,
    regex: Regex,
}

impl CompiledPattern {
    /// Compiles the matcher anchored at the start of the input.
    pub fn new(pattern: &Pattern) -> Result<Self, EngineError> {
        let regex = Regex::new(&format!("^(?:{})", pattern.matcher)).map_err(|e| {
            EngineError::InvalidPattern {
                name: pattern.name.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            pattern: pattern.clone(),
            regex,
        })
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }
}

/// Matches file names and extracts their fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Classifier {
    /// Compiles `pattern` and classifies a single file name.
    pub fn classify(&self, filename: &str, pattern: &Pattern) -> Result<Classification, EngineError> {
        let compiled = CompiledPattern::new(pattern)?;
        Ok(self.classify_compiled(filename, &compiled))
    }

    /// Classifies a file name with an already compiled pattern.
    ///
    /// Group 1 becomes `number`, group 2 becomes `year` with the century
    /// prefix, and named groups are added under their own names. Groups that
    /// did not take part in the match are left out.
    pub fn classify_compiled(&self, filename: &str, compiled: &CompiledPattern) -> Classification {
        let Some(captures) = compiled.regex.captures(filename) else {
            return Classification::NoMatch;
        };

        let mut fields = ExtractedFields::new();
        for name in compiled.regex.capture_names().flatten() {
            if let Some(value) = captures.name(name) {
                fields.insert(name, value.as_str());
            }
        }
        if let Some(number) = captures.get(1) {
            fields.insert(ExtractedFields::NUMBER, number.as_str());
        }
        if let Some(year) = captures.get(2) {
            fields.insert(
                ExtractedFields::YEAR,
                format!("{}{}", CENTURY_PREFIX, year.as_str()),
            );
        }
        Classification::Matched(fields)
    }
}
