//! Source contract: the catalog of available migrations

use async_trait::async_trait;

use crate::error::MigrateResult;
use crate::migration::{Direction, Migration};

/// Provider of the full migration catalog and its executable content.
///
/// `list` must be deterministic regardless of call order. `load` must fail
/// with [`MigrateError::ContentNotFound`](crate::MigrateError::ContentNotFound)
/// when the requested direction has no content. Sources are read-only and may
/// be shared by several runners at once.
#[async_trait]
pub trait Source: Send + Sync {
    /// Executable content handed to a compatible target
    type Content: Send;

    /// List every available migration
    async fn list(&self) -> MigrateResult<Vec<Migration>>;

    /// Materialize the content of a migration for one direction
    async fn load(&self, migration: &Migration, direction: Direction)
        -> MigrateResult<Self::Content>;
}
