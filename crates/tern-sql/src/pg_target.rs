//! PostgreSQL target
//!
//! Applied migrations live in a tracking table. Mutual exclusion uses a
//! transaction-scoped advisory lock held by a dedicated connection for the
//! lifetime of the guard, so the pool needs at least two connections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sha2::{Digest, Sha256};
use sqlx::{Executor, Postgres, Row, Transaction};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use tern_core::{
    AppliedRecord, Direction, LockPolicy, MigrateError, MigrateResult, Migration, StepError,
    Target,
};

use crate::script::SqlScript;

/// Default tracking table name
pub const DEFAULT_TABLE: &str = "_tern_migrations";

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$";

fn backend_error(context: &str, e: sqlx::Error) -> MigrateError {
    MigrateError::Backend(format!("{}: {}", context, e))
}

/// Exclusive hold on the advisory lock; dropping it rolls the lock transaction back
pub struct PgLockGuard {
    transaction: Transaction<'static, Postgres>,
}

impl fmt::Debug for PgLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PgLockGuard")
    }
}

impl PgLockGuard {
    /// Release the lock and wait for the server to confirm
    pub async fn release(self) -> MigrateResult<()> {
        self.transaction
            .commit()
            .await
            .map_err(|e| backend_error("Failed to release migration lock", e))
    }
}

/// Target recording applied migrations in a PostgreSQL table
#[derive(Debug, Clone)]
pub struct PgTarget {
    pool: PgPool,
    table: String,
    lock_key: i64,
}

impl PgTarget {
    /// Create a target using the default tracking table
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
            lock_key: lock_key(DEFAULT_TABLE),
        }
    }

    /// Create a target with a custom, optionally schema-qualified, tracking table
    pub fn with_table(pool: PgPool, table: impl Into<String>) -> MigrateResult<Self> {
        let table = table.into();
        validate_identifier(&table)?;

        Ok(Self {
            pool,
            lock_key: lock_key(&table),
            table,
        })
    }

    /// Connect a small pool to the given database
    pub async fn connect(database_url: &str, table: &str) -> MigrateResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| backend_error("Failed to connect to database", e))?;

        Self::with_table(pool, table)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Advisory lock key derived from the table name
    pub fn lock_key(&self) -> i64 {
        self.lock_key
    }

    /// SQL to create the tracking table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version TEXT PRIMARY KEY,\n    \
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),\n    \
                checksum TEXT\n\
            )",
            self.table
        )
    }

    /// SQL to list applied migrations
    pub fn select_applied_sql(&self) -> String {
        format!(
            "SELECT version, applied_at, checksum FROM {} ORDER BY applied_at, version",
            self.table
        )
    }

    /// SQL to record a migration as applied
    pub fn insert_record_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version, applied_at, checksum) VALUES ($1, $2, $3)",
            self.table
        )
    }

    /// SQL to remove a migration record
    pub fn delete_record_sql(&self) -> String {
        format!("DELETE FROM {} WHERE version = $1", self.table)
    }

    /// Send the script text as written in a single round trip.
    ///
    /// Without bind arguments sqlx uses the simple query protocol, which
    /// accepts several statements per call.
    async fn run_script(
        &self,
        transaction: &mut Transaction<'static, Postgres>,
        script: &SqlScript,
    ) -> Result<(), sqlx::Error> {
        if script.is_blank() {
            return Ok(());
        }
        debug!("Executing script with {} statement(s)", script.statements().len());
        (&mut **transaction).execute(script.sql()).await?;
        Ok(())
    }

    async fn write_record(
        &self,
        transaction: &mut Transaction<'static, Postgres>,
        migration: &Migration,
        direction: Direction,
        checksum: Option<String>,
    ) -> Result<(), sqlx::Error> {
        match direction {
            Direction::Apply => {
                sqlx::query(&self.insert_record_sql())
                    .bind(migration.version().as_str())
                    .bind(Utc::now())
                    .bind(checksum)
                    .execute(&mut **transaction)
                    .await?;
            }
            Direction::Revert => {
                sqlx::query(&self.delete_record_sql())
                    .bind(migration.version().as_str())
                    .execute(&mut **transaction)
                    .await?;
            }
        }
        Ok(())
    }

    async fn record(&self, migration: &Migration, direction: Direction) -> MigrateResult<()> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_error("Failed to start transaction", e))?;
        self.write_record(&mut transaction, migration, direction, None)
            .await
            .map_err(|e| backend_error("Failed to record migration", e))?;
        transaction
            .commit()
            .await
            .map_err(|e| backend_error("Failed to commit migration record", e))
    }
}

#[async_trait]
impl Target for PgTarget {
    type Content = SqlScript;
    type Guard = PgLockGuard;

    async fn prepare(&self) -> MigrateResult<()> {
        sqlx::query(&self.create_table_sql())
            .execute(&self.pool)
            .await
            .map_err(|e| backend_error("Failed to create migrations table", e))?;
        Ok(())
    }

    async fn applied_records(&self) -> MigrateResult<Vec<AppliedRecord>> {
        let rows = sqlx::query(&self.select_applied_sql())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend_error("Failed to read applied migrations", e))?;

        rows.iter()
            .map(|row| -> MigrateResult<AppliedRecord> {
                let version: String = row
                    .try_get("version")
                    .map_err(|e| backend_error("Invalid migration record", e))?;
                let applied_at: DateTime<Utc> = row
                    .try_get("applied_at")
                    .map_err(|e| backend_error("Invalid migration record", e))?;
                let checksum: Option<String> = row
                    .try_get("checksum")
                    .map_err(|e| backend_error("Invalid migration record", e))?;

                Ok(AppliedRecord {
                    version: version.into(),
                    applied_at,
                    checksum,
                })
            })
            .collect()
    }

    async fn execute(&self, content: SqlScript) -> MigrateResult<()> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_error("Failed to start transaction", e))?;
        self.run_script(&mut transaction, &content)
            .await
            .map_err(|e| backend_error("Failed to execute migration", e))?;
        transaction
            .commit()
            .await
            .map_err(|e| backend_error("Failed to commit migration", e))
    }

    async fn record_applied(&self, migration: &Migration) -> MigrateResult<()> {
        self.record(migration, Direction::Apply).await
    }

    async fn record_reverted(&self, migration: &Migration) -> MigrateResult<()> {
        self.record(migration, Direction::Revert).await
    }

    async fn lock(&self, policy: LockPolicy) -> MigrateResult<PgLockGuard> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_error("Failed to start lock transaction", e))?;

        match policy {
            LockPolicy::Block => {
                sqlx::query("SELECT pg_advisory_xact_lock($1)")
                    .bind(self.lock_key)
                    .execute(&mut *transaction)
                    .await
                    .map_err(|e| backend_error("Failed to acquire migration lock", e))?;
            }
            LockPolicy::FailFast => {
                let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
                    .bind(self.lock_key)
                    .fetch_one(&mut *transaction)
                    .await
                    .map_err(|e| backend_error("Failed to acquire migration lock", e))?;
                if !acquired {
                    return Err(MigrateError::LockUnavailable(format!(
                        "another process holds the lock on {}",
                        self.table
                    )));
                }
            }
        }

        debug!("Acquired migration lock {} on {}", self.lock_key, self.table);
        Ok(PgLockGuard { transaction })
    }

    /// Run the statements and the record change in one transaction.
    ///
    /// A failure before commit rolls both back and is reported as an
    /// execution failure. Only a failed commit leaves the outcome unknown.
    async fn apply(
        &self,
        migration: &Migration,
        direction: Direction,
        content: SqlScript,
    ) -> Result<(), StepError> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|e| StepError::Execution(backend_error("Failed to start transaction", e)))?;

        self.run_script(&mut transaction, &content)
            .await
            .map_err(|e| StepError::Execution(backend_error("Failed to execute migration", e)))?;

        let checksum = match direction {
            Direction::Apply => Some(content.checksum()),
            Direction::Revert => None,
        };
        self.write_record(&mut transaction, migration, direction, checksum)
            .await
            .map_err(|e| StepError::Execution(backend_error("Failed to record migration", e)))?;

        transaction
            .commit()
            .await
            .map_err(|e| StepError::Recording(backend_error("Failed to commit migration", e)))?;

        info!("{} {} committed", direction, migration);
        Ok(())
    }
}

fn validate_identifier(table: &str) -> MigrateResult<()> {
    let pattern = Regex::new(IDENTIFIER_PATTERN)
        .map_err(|e| MigrateError::Configuration(format!("Invalid identifier pattern: {}", e)))?;

    if pattern.is_match(table) {
        Ok(())
    } else {
        Err(MigrateError::Configuration(format!(
            "Invalid migrations table name: {:?}",
            table
        )))
    }
}

/// First eight bytes of the SHA-256 of the namespaced table name
fn lock_key(table: &str) -> i64 {
    let digest = Sha256::digest(format!("tern:{}", table).as_bytes());
    let mut key = [0u8; 8];
    key.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("_tern_migrations").is_ok());
        assert!(validate_identifier("ops.schema_history").is_ok());
        assert!(validate_identifier("bad-name").is_err());
        assert!(validate_identifier("x; DROP TABLE users").is_err());
        assert!(validate_identifier("1table").is_err());
        assert!(validate_identifier("a.b.c").is_err());
    }

    #[test]
    fn test_lock_key_depends_on_table() {
        assert_eq!(lock_key("_tern_migrations"), lock_key("_tern_migrations"));
        assert_ne!(lock_key("_tern_migrations"), lock_key("other_migrations"));
    }

    #[test]
    fn test_lock_key_is_sha256_prefix() {
        let hex = crate::script::sha256_hex(b"tern:_tern_migrations");
        let prefix = u64::from_str_radix(&hex[..16], 16).unwrap();
        assert_eq!(lock_key("_tern_migrations"), i64::from_be_bytes(prefix.to_be_bytes()));
    }

    #[tokio::test]
    async fn test_sql_uses_table_name() {
        // Lazy pools never connect until used
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/tern")
            .unwrap();
        let target = PgTarget::with_table(pool, "ops.history").unwrap();

        assert!(target
            .create_table_sql()
            .starts_with("CREATE TABLE IF NOT EXISTS ops.history"));
        assert_eq!(
            target.delete_record_sql(),
            "DELETE FROM ops.history WHERE version = $1"
        );
        assert!(target.insert_record_sql().contains("(version, applied_at, checksum)"));
        assert_eq!(target.lock_key(), lock_key("ops.history"));
    }
}
