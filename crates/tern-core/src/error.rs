//! Error types for planning and running migrations

use thiserror::Error;

use crate::migration::{Direction, Version};

/// Result type for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Migration errors, grouped by the phase that raises them
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Duplicate migration version: {version}")]
    DuplicateVersion { version: Version },

    #[error("Migration {version} is recorded as applied but is not provided by the source")]
    MissingMigration { version: Version },

    #[error("Migration {version} cannot be undone")]
    NoUndoAvailable { version: Version },

    #[error("Version {version} is not an available migration")]
    UnknownVersion { version: Version },

    #[error("Migration lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("Plan is stale: {direction} of migration {version} no longer matches the target state")]
    PlanStale { version: Version, direction: Direction },

    #[error("No {direction} content for migration {version}")]
    ContentNotFound { version: Version, direction: Direction },

    #[error("Failed to load {direction} content for migration {version}: {source}")]
    ContentLoadFailed {
        version: Version,
        direction: Direction,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("Migration {version} failed to execute ({direction}): {source}")]
    BackendExecutionFailed {
        version: Version,
        direction: Direction,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("Migration {version} executed ({direction}) but its state could not be recorded, manual reconciliation required: {source}")]
    RecordingFailed {
        version: Version,
        direction: Direction,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("Migration run cancelled")]
    Cancelled,

    #[error("Source error: {0}")]
    Source(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Stable error class name surfaced in reports
    pub fn class(&self) -> &'static str {
        match self {
            MigrateError::DuplicateVersion { .. } => "DuplicateVersion",
            MigrateError::MissingMigration { .. } => "MissingMigration",
            MigrateError::NoUndoAvailable { .. } => "NoUndoAvailable",
            MigrateError::UnknownVersion { .. } => "UnknownVersion",
            MigrateError::LockUnavailable(_) => "LockUnavailable",
            MigrateError::PlanStale { .. } => "PlanStale",
            MigrateError::ContentNotFound { .. } => "ContentNotFound",
            MigrateError::ContentLoadFailed { .. } => "ContentLoadFailed",
            MigrateError::BackendExecutionFailed { .. } => "BackendExecutionFailed",
            MigrateError::RecordingFailed { .. } => "RecordingFailed",
            MigrateError::Cancelled => "Cancelled",
            MigrateError::Source(_) => "Source",
            MigrateError::Backend(_) => "Backend",
            MigrateError::Configuration(_) => "Configuration",
            MigrateError::Io(_) => "Io",
        }
    }

    /// Errors raised before any mutation happened
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            MigrateError::DuplicateVersion { .. }
                | MigrateError::MissingMigration { .. }
                | MigrateError::NoUndoAvailable { .. }
                | MigrateError::UnknownVersion { .. }
        )
    }

    /// Backend state and recorded state may disagree
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(self, MigrateError::RecordingFailed { .. })
    }

    /// Cancellation is a terminal reason, not a fault
    pub fn is_fault(&self) -> bool {
        !matches!(self, MigrateError::Cancelled)
    }

    /// Version of the migration the error is about, if any
    pub fn version(&self) -> Option<&Version> {
        match self {
            MigrateError::DuplicateVersion { version }
            | MigrateError::MissingMigration { version }
            | MigrateError::NoUndoAvailable { version }
            | MigrateError::UnknownVersion { version }
            | MigrateError::PlanStale { version, .. }
            | MigrateError::ContentNotFound { version, .. }
            | MigrateError::ContentLoadFailed { version, .. }
            | MigrateError::BackendExecutionFailed { version, .. }
            | MigrateError::RecordingFailed { version, .. } => Some(version),
            _ => None,
        }
    }
}

/// Failure of a single target step, split by phase
#[derive(Error, Debug)]
pub enum StepError {
    /// The content itself failed, nothing was recorded
    #[error("execution failed: {0}")]
    Execution(MigrateError),

    /// The content ran but the state transition was not recorded
    #[error("recording failed: {0}")]
    Recording(MigrateError),
}
