//! Volume name validation and slug normalization.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KeelError, KeelResult};

static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_-]+").expect("valid regex"));

static SEPARATOR_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_]{2,}").expect("valid regex"));

/// Normalize arbitrary input into slug form.
///
/// Lowercases, replaces every run of characters outside `[a-z0-9_-]` with a
/// hyphen, collapses separator runs into a single hyphen and trims leading
/// and trailing separators. The result may be empty.
#[must_use]
pub fn slugify(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    let replaced = DISALLOWED.replace_all(&lowered, "-");
    let collapsed = SEPARATOR_RUNS.replace_all(&replaced, "-");
    collapsed.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// A validated volume name.
///
/// Volume names must:
/// - Be 1-64 characters long
/// - Contain only lowercase alphanumerics, hyphens and underscores
/// - Not start or end with a separator
/// - Not contain two separators in a row
///
/// Non-canonical input is rejected, never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeName(String);

impl VolumeName {
    /// Maximum length of a volume name.
    pub const MAX_LENGTH: usize = 64;

    /// Create a new volume name, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::InvalidVolumeName`] if the name is not a slug.
    pub fn new(name: impl Into<String>) -> KeelResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> KeelResult<()> {
        if is_canonical(name) {
            return Ok(());
        }

        let suggestion = slugify(name);
        Err(KeelError::InvalidVolumeName {
            name: name.to_string(),
            suggestion: (!suggestion.is_empty() && suggestion.len() <= Self::MAX_LENGTH)
                .then_some(suggestion),
        })
    }
}

fn is_canonical(name: &str) -> bool {
    if name.is_empty() || name.len() > VolumeName::MAX_LENGTH {
        return false;
    }

    let is_separator = |c: char| c == '-' || c == '_';
    let mut previous_separator = true;
    for c in name.chars() {
        let separator = is_separator(c);
        if !separator && !(c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return false;
        }
        if separator && previous_separator {
            return false;
        }
        previous_separator = separator;
    }

    !previous_separator
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VolumeName {
    type Err = KeelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VolumeName {
    type Error = KeelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VolumeName> for String {
    fn from(name: VolumeName) -> Self {
        name.0
    }
}

impl AsRef<str> for VolumeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
