//! Plan types produced by the planner and consumed by the runner

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::migration::{Direction, Migration, Version};

/// Caller intent for planning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    /// Apply everything not yet applied
    Latest,
    /// Apply or revert until exactly the versions up to this one are applied
    ToVersion(Version),
    /// Apply the next n pending migrations, or revert the last n applied when negative
    Steps(i64),
    /// Revert every applied migration
    Rewind,
    /// Revert every applied migration, then apply every available one
    Reset,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Goal::Latest => f.write_str("latest"),
            Goal::ToVersion(version) => write!(f, "to version {}", version),
            Goal::Steps(n) if n.unsigned_abs() == 1 => write!(f, "{:+} step", n),
            Goal::Steps(n) => write!(f, "{:+} steps", n),
            Goal::Rewind => f.write_str("rewind"),
            Goal::Reset => f.write_str("reset"),
        }
    }
}

/// One unit of planned work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    migration: Migration,
    direction: Direction,
}

impl Operation {
    pub(crate) fn new(migration: Migration, direction: Direction) -> Self {
        Self {
            migration,
            direction,
        }
    }

    /// Get the migration this operation acts on
    pub fn migration(&self) -> &Migration {
        &self.migration
    }

    /// Get the operation direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Shortcut for the migration version
    pub fn version(&self) -> &Version {
        self.migration.version()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.direction, self.migration)
    }
}

/// Ordered sequence of operations computed against one snapshot of a target.
///
/// Operations are listed in execution order. A plan is immutable and only the
/// planner builds one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    operations: Vec<Operation>,
    goal: Goal,
}

impl Plan {
    pub(crate) fn new(operations: Vec<Operation>, goal: Goal) -> Self {
        Self { operations, goal }
    }

    /// Get the planned operations in execution order
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Get the goal this plan was computed for
    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    /// Number of planned operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether there is nothing to do
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Iterate over the operations
    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    /// Human-readable one-line description
    pub fn describe(&self) -> String {
        match self.operations.len() {
            0 => format!("{}: nothing to do", self.goal),
            1 => format!("{}: 1 operation", self.goal),
            n => format!("{}: {} operations", self.goal, n),
        }
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}
