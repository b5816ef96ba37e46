//! Target contract: the backend being migrated and its applied-set

use async_trait::async_trait;

use crate::config::LockPolicy;
use crate::error::{MigrateResult, StepError};
use crate::migration::{AppliedRecord, Direction, Migration};

/// Recorder of applied-migration state and executor of raw operations.
///
/// The target owns the applied-set and the lock guarding it. Dropping the
/// guard returned by [`Target::lock`] releases the lock.
#[async_trait]
pub trait Target: Send + Sync {
    /// Executable content this target understands
    type Content: Send;

    /// Owning lock handle, released on drop
    type Guard: Send;

    /// Create tracking storage if needed (idempotent)
    async fn prepare(&self) -> MigrateResult<()> {
        Ok(())
    }

    /// Snapshot of every applied migration record
    async fn applied_records(&self) -> MigrateResult<Vec<AppliedRecord>>;

    /// Run raw content against the backend
    async fn execute(&self, content: Self::Content) -> MigrateResult<()>;

    /// Record a migration as applied
    async fn record_applied(&self, migration: &Migration) -> MigrateResult<()>;

    /// Remove the applied record of a migration
    async fn record_reverted(&self, migration: &Migration) -> MigrateResult<()>;

    /// Acquire the exclusive migration lock
    async fn lock(&self, policy: LockPolicy) -> MigrateResult<Self::Guard>;

    /// Execute content and record the resulting state transition.
    ///
    /// The default runs [`execute`](Target::execute) then the matching record
    /// call. Targets able to make both indivisible (one transaction) should
    /// override it.
    async fn apply(
        &self,
        migration: &Migration,
        direction: Direction,
        content: Self::Content,
    ) -> Result<(), StepError> {
        self.execute(content).await.map_err(StepError::Execution)?;

        match direction {
            Direction::Apply => self.record_applied(migration).await,
            Direction::Revert => self.record_reverted(migration).await,
        }
        .map_err(StepError::Recording)
    }
}
