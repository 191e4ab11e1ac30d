//! `test[:subtest[:subtest...]]` selectors given on the command line.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::suite::TestSuite;

/// Keyword expanding to every subtest of a suite.
pub const ALL_SUBTESTS: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty test selector")]
    Empty,
    #[error("test selector '{0}' names no test group")]
    MissingSuite(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtestSelection {
    All,
    /// Distinct names, in the order they were first given.
    Named(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub suite: String,
    pub subtests: SubtestSelection,
}

impl Selector {
    pub fn all(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            subtests: SubtestSelection::All,
        }
    }

    /// Subtest names to run against `suite`. Named subtests are returned as given, even when the suite does not
    /// define them; the coordinator reports those as errors.
    pub fn resolve(&self, suite: &TestSuite) -> Vec<String> {
        match &self.subtests {
            SubtestSelection::All => suite.names(),
            SubtestSelection::Named(names) => names.clone(),
        }
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut parts = s.split(':');
        let suite = parts.next().unwrap_or_default();
        if suite.is_empty() {
            return Err(SelectorError::MissingSuite(s.to_string()));
        }

        let mut names: Vec<String> = Vec::new();
        for part in parts.filter(|p| !p.is_empty()) {
            if part == ALL_SUBTESTS {
                // `all` wins over everything given before or after it
                return Ok(Self::all(suite));
            }
            if !names.iter().any(|n| n == part) {
                names.push(part.to_string());
            }
        }

        let subtests = if names.is_empty() {
            SubtestSelection::All
        } else {
            SubtestSelection::Named(names)
        };
        Ok(Self {
            suite: suite.to_string(),
            subtests,
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suite)?;
        match &self.subtests {
            SubtestSelection::All => write!(f, ":{ALL_SUBTESTS}"),
            SubtestSelection::Named(names) => names.iter().try_for_each(|n| write!(f, ":{n}")),
        }
    }
}
