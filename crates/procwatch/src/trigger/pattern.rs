//! Compiled trigger patterns.

use std::fmt;

use regex::{Captures, Regex};

use crate::error::ConfigError;

/// A regular expression matched against each output line.
///
/// Matching is a search anywhere in the line, and the line still carries
/// its `\n` terminator; anchor the end with `(?m)...$` or `\n?$`.
#[derive(Clone)]
pub struct TriggerPattern {
    regex: Regex,
}

impl TriggerPattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] if `pattern` is not a valid
    /// regular expression.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(pattern)
            .map(Self::from_regex)
            .map_err(|e| ConfigError::invalid_pattern(pattern, e))
    }

    /// Wrap an already compiled regex.
    #[must_use]
    pub const fn from_regex(regex: Regex) -> Self {
        Self { regex }
    }

    /// The source pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Whether the pattern matches anywhere in `line`.
    #[must_use]
    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// Capture groups of the first match in `line`.
    #[must_use]
    pub fn captures<'h>(&self, line: &'h str) -> Option<Captures<'h>> {
        self.regex.captures(line)
    }
}

impl fmt::Debug for TriggerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TriggerPattern").field(&self.as_str()).finish()
    }
}

impl fmt::Display for TriggerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TriggerPattern {
    type Error = ConfigError;

    fn try_from(pattern: &str) -> Result<Self, Self::Error> {
        Self::new(pattern)
    }
}
