//! Migration Definitions - Core types describing versioned changes
//!
//! Defines the fundamental values shared by sources, targets, the planner and
//! the runner: [`Version`], [`Migration`], [`AppliedRecord`] and [`Direction`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Orderable migration version token.
///
/// Tokens made only of ASCII digits compare numerically, so `"9"` sorts before
/// `"10"`. Any other token compares by its raw bytes and sorts after every
/// numeric token. Two versions are equal only when their text is identical,
/// but numeric tokens of equal value [collide](Version::collides_with).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Create a version from any string-like token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether two tokens name the same version: identical text, or numeric
    /// tokens of equal value such as `"1"` and `"01"`
    pub fn collides_with(&self, other: &Version) -> bool {
        match (self.numeric_digits(), other.numeric_digits()) {
            (Some(a), Some(b)) => a == b,
            _ => self.0 == other.0,
        }
    }

    /// Digits of a numeric token with leading zeros removed
    fn numeric_digits(&self) -> Option<&str> {
        if !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit()) {
            Some(self.0.trim_start_matches('0'))
        } else {
            None
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_digits(), other.numeric_digits()) {
            (Some(a), Some(b)) => a
                .len()
                .cmp(&b.len())
                .then_with(|| a.cmp(b))
                .then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Version {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<u64> for Version {
    fn from(token: u64) -> Self {
        Self(token.to_string())
    }
}

/// Represents one versioned change known to a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Unique, orderable identifier (typically a timestamp)
    version: Version,
    /// Human-readable name for the migration
    name: String,
    /// Whether the migration ships backward ("undo") content
    has_undo: bool,
}

impl Migration {
    /// Create a new migration description
    pub fn new(version: impl Into<Version>, name: impl Into<String>, has_undo: bool) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            has_undo,
        }
    }

    /// Get the migration version
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Get the migration name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this migration can be reverted
    pub fn has_undo(&self) -> bool {
        self.has_undo
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{} ({})", self.version, self.name)
        }
    }
}

/// Migration status as persisted by a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRecord {
    /// Version of the applied migration
    pub version: Version,
    /// When the migration was applied
    pub applied_at: DateTime<Utc>,
    /// Optional checksum of the executed content
    pub checksum: Option<String>,
}

impl AppliedRecord {
    /// Create a record stamped with the current time
    pub fn new(version: impl Into<Version>) -> Self {
        Self {
            version: version.into(),
            applied_at: Utc::now(),
            checksum: None,
        }
    }

    /// Attach a content checksum
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the migration (run "do" content)
    Apply,
    /// Revert the migration (run "undo" content)
    Revert,
}

impl Direction {
    /// Short action label used in logs and file names
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Apply => "do",
            Direction::Revert => "undo",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
