//! In-memory source and target for development and testing

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::config::LockPolicy;
use crate::error::{MigrateError, MigrateResult};
use crate::migration::{AppliedRecord, Direction, Migration, Version};
use crate::source::Source;
use crate::target::Target;

type ScriptFn = Arc<dyn Fn() -> BoxFuture<'static, MigrateResult<()>> + Send + Sync>;

/// Body of one direction of an in-memory migration
#[derive(Clone)]
pub enum MemoryBody {
    /// Opaque statement, only recorded by the target
    Statement(String),
    /// Async closure run by the target on execute
    Script(ScriptFn),
}

impl MemoryBody {
    pub fn statement(statement: impl Into<String>) -> Self {
        MemoryBody::Statement(statement.into())
    }

    pub fn script<F, Fut>(script: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MigrateResult<()>> + Send + 'static,
    {
        MemoryBody::Script(Arc::new(move || Box::pin(script())))
    }
}

impl fmt::Debug for MemoryBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryBody::Statement(statement) => f.debug_tuple("Statement").field(statement).finish(),
            MemoryBody::Script(_) => f.write_str("Script(..)"),
        }
    }
}

/// Content handed from [`MemorySource`] to [`MemoryTarget`]
#[derive(Debug, Clone)]
pub struct MemoryContent {
    pub version: Version,
    pub direction: Direction,
    pub body: MemoryBody,
}

#[derive(Debug, Clone)]
struct MemoryMigration {
    migration: Migration,
    apply: MemoryBody,
    revert: Option<MemoryBody>,
}

/// Source backed by a list of in-process migrations
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    migrations: Vec<MemoryMigration>,
    failing_loads: HashSet<(Version, Direction)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a migration; no revert body means it cannot be undone
    pub fn with_migration(
        mut self,
        version: impl Into<Version>,
        name: impl Into<String>,
        apply: MemoryBody,
        revert: Option<MemoryBody>,
    ) -> Self {
        let migration = Migration::new(version, name, revert.is_some());
        self.migrations.push(MemoryMigration {
            migration,
            apply,
            revert,
        });
        self
    }

    /// Add a reversible migration made of opaque statements
    pub fn with_statements(
        self,
        version: impl Into<Version>,
        name: impl Into<String>,
        apply: &str,
        revert: &str,
    ) -> Self {
        self.with_migration(
            version,
            name,
            MemoryBody::statement(apply),
            Some(MemoryBody::statement(revert)),
        )
    }

    /// Make `load` fail for one direction of a migration
    pub fn fail_load_on(mut self, version: impl Into<Version>, direction: Direction) -> Self {
        self.failing_loads.insert((version.into(), direction));
        self
    }
}

#[async_trait]
impl Source for MemorySource {
    type Content = MemoryContent;

    async fn list(&self) -> MigrateResult<Vec<Migration>> {
        let mut migrations: Vec<Migration> = self
            .migrations
            .iter()
            .map(|m| m.migration.clone())
            .collect();
        migrations.sort_by(|a, b| a.version().cmp(b.version()));
        Ok(migrations)
    }

    async fn load(
        &self,
        migration: &Migration,
        direction: Direction,
    ) -> MigrateResult<MemoryContent> {
        let version = migration.version();

        if self.failing_loads.contains(&(version.clone(), direction)) {
            return Err(MigrateError::Source(format!(
                "injected load failure for {} of {}",
                direction, version
            )));
        }

        let entry = self
            .migrations
            .iter()
            .find(|m| m.migration.version() == version);

        let body = match (entry, direction) {
            (Some(entry), Direction::Apply) => Some(entry.apply.clone()),
            (Some(entry), Direction::Revert) => entry.revert.clone(),
            (None, _) => None,
        };

        body.map(|body| MemoryContent {
            version: version.clone(),
            direction,
            body,
        })
        .ok_or_else(|| MigrateError::ContentNotFound {
            version: version.clone(),
            direction,
        })
    }
}

/// Where an injected [`MemoryTarget`] failure strikes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// `execute` returns an error, nothing is recorded
    Execute,
    /// `execute` succeeds, the matching record call fails
    Record,
    /// `execute` panics
    Panic,
}

#[derive(Default)]
struct MemoryTargetState {
    records: RwLock<BTreeMap<Version, AppliedRecord>>,
    executed: RwLock<Vec<(Version, Direction)>>,
    failures: RwLock<HashMap<(Version, Direction), FailurePoint>>,
    lock: Arc<Mutex<()>>,
}

/// Target keeping its applied-set in process memory.
///
/// Clones share state, so several runners can contend on one target.
#[derive(Clone, Default)]
pub struct MemoryTarget {
    state: Arc<MemoryTargetState>,
}

/// Exclusive hold on a [`MemoryTarget`]'s migration lock
pub struct MemoryGuard {
    _guard: OwnedMutexGuard<()>,
}

impl fmt::Debug for MemoryGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MemoryGuard")
    }
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark versions as applied without executing anything
    pub fn seed_applied<I, V>(&self, versions: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Version>,
    {
        let mut records = self.state.records.write();
        for version in versions {
            let record = AppliedRecord::new(version);
            records.insert(record.version.clone(), record);
        }
    }

    /// Applied versions, ascending
    pub fn applied_versions(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = self.state.records.read().keys().cloned().collect();
        versions.sort();
        versions
    }

    /// Every successfully executed content, in order
    pub fn executed(&self) -> Vec<(Version, Direction)> {
        self.state.executed.read().clone()
    }

    /// Inject a failure for one direction of a migration
    pub fn fail_on(&self, version: impl Into<Version>, direction: Direction, point: FailurePoint) {
        self.state
            .failures
            .write()
            .insert((version.into(), direction), point);
    }

    pub fn clear_failures(&self) {
        self.state.failures.write().clear();
    }

    /// Whether some runner currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.state.lock.try_lock().is_err()
    }

    fn failure(&self, version: &Version, direction: Direction) -> Option<FailurePoint> {
        self.state
            .failures
            .read()
            .get(&(version.clone(), direction))
            .copied()
    }
}

#[async_trait]
impl Target for MemoryTarget {
    type Content = MemoryContent;
    type Guard = MemoryGuard;

    async fn applied_records(&self) -> MigrateResult<Vec<AppliedRecord>> {
        let mut records: Vec<AppliedRecord> =
            self.state.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(records)
    }

    async fn execute(&self, content: MemoryContent) -> MigrateResult<()> {
        match self.failure(&content.version, content.direction) {
            Some(FailurePoint::Execute) => {
                return Err(MigrateError::Backend(format!(
                    "injected execution failure for {} of {}",
                    content.direction, content.version
                )));
            }
            Some(FailurePoint::Panic) => {
                panic!(
                    "injected panic for {} of {}",
                    content.direction, content.version
                );
            }
            _ => {}
        }

        match &content.body {
            MemoryBody::Statement(statement) => {
                debug!("Executing statement for {}: {}", content.version, statement)
            }
            MemoryBody::Script(script) => script().await?,
        }

        self.state
            .executed
            .write()
            .push((content.version, content.direction));
        Ok(())
    }

    async fn record_applied(&self, migration: &Migration) -> MigrateResult<()> {
        if self.failure(migration.version(), Direction::Apply) == Some(FailurePoint::Record) {
            return Err(MigrateError::Backend(format!(
                "injected recording failure for {}",
                migration.version()
            )));
        }

        self.state.records.write().insert(
            migration.version().clone(),
            AppliedRecord::new(migration.version().clone()),
        );
        Ok(())
    }

    async fn record_reverted(&self, migration: &Migration) -> MigrateResult<()> {
        if self.failure(migration.version(), Direction::Revert) == Some(FailurePoint::Record) {
            return Err(MigrateError::Backend(format!(
                "injected recording failure for {}",
                migration.version()
            )));
        }

        self.state.records.write().remove(migration.version());
        Ok(())
    }

    async fn lock(&self, policy: LockPolicy) -> MigrateResult<MemoryGuard> {
        let lock = Arc::clone(&self.state.lock);
        let guard = match policy {
            LockPolicy::Block => lock.lock_owned().await,
            LockPolicy::FailFast => lock.try_lock_owned().map_err(|_| {
                MigrateError::LockUnavailable("migration lock is held by another runner".to_string())
            })?,
        };
        Ok(MemoryGuard { _guard: guard })
    }
}
