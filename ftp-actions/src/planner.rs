// Transfer planning: which listed entries an action acts on, and how

use crate::models::RemoteEntry;
use regex::Regex;
use tracing::debug;

pub const DEFAULT_FILE_NAME_REGEX: &str = ".*";

/// Name filter applied to an entry's base name
///
/// The pattern must match the whole name, not a substring of it.
#[derive(Debug, Clone)]
pub struct TransferFilter {
    pattern: String,
    regex: Regex,
}

impl TransferFilter {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

impl Default for TransferFilter {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_FILE_NAME_REGEX.to_string(),
            regex: Regex::new("^(?:.*)$").expect("Invalid default filter"),
        }
    }
}

/// Whether ".zip" entries are expanded on write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipPolicy {
    pub extract: bool,
}

impl Default for ZipPolicy {
    fn default() -> Self {
        Self { extract: true }
    }
}

impl ZipPolicy {
    pub fn new(extract: bool) -> Self {
        Self { extract }
    }

    pub fn should_expand(&self, name: &str) -> bool {
        self.extract && is_zip_archive(name)
    }
}

pub fn is_zip_archive(name: &str) -> bool {
    name.ends_with(".zip")
}

pub fn is_dot_entry(name: &str) -> bool {
    name == "." || name == ".."
}

/// Select the entries to transfer, preserving listing order
pub fn plan(entries: Vec<RemoteEntry>, filter: &TransferFilter) -> Vec<RemoteEntry> {
    entries
        .into_iter()
        .filter(|entry| {
            if is_dot_entry(&entry.name) {
                return false;
            }
            if entry.is_directory {
                debug!(name = %entry.name, "Skipping directory entry");
                return false;
            }
            if !filter.matches(&entry.name) {
                debug!(
                    name = %entry.name,
                    pattern = %filter.pattern(),
                    "Skipping file since it doesn't match the regex"
                );
                return false;
            }
            true
        })
        .collect()
}
