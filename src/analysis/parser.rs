//! Analyzer log parsing.
//!
//! Counts analyzer error markers in raw compiler output.

use regex::Regex;

/// Marker NullAway prints for every reported error.
pub const DEFAULT_ERROR_PATTERN: &str = r"error: \[NullAway\]";

/// Counts occurrences of an analyzer error marker.
#[derive(Debug, Clone)]
pub struct LogParser {
    pattern: Regex,
}

impl LogParser {
    /// Build a parser from a regular expression.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Number of non-overlapping matches in `output`.
    pub fn count(&self, output: &str) -> u64 {
        self.pattern.find_iter(output).count() as u64
    }

    /// The pattern being matched.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}
