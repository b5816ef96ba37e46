//! # tern-sql
//!
//! SQL migrations for tern: a source reading `.sql` files from a directory
//! and a PostgreSQL target tracking applied versions in a table.
//!
//! ```rust,no_run
//! use tern_core::{Goal, Migrator};
//! use tern_sql::{FsSource, PgTarget, DEFAULT_TABLE};
//!
//! # async fn run() -> tern_core::MigrateResult<()> {
//! let target = PgTarget::connect("postgres://localhost/app", DEFAULT_TABLE).await?;
//! let migrator = Migrator::new(FsSource::new("migrations"), target);
//!
//! let report = migrator.migrate(Goal::Latest).await?;
//! println!("applied {} migrations", report.completed().len());
//! # Ok(())
//! # }
//! ```

pub mod fs_source;
pub mod pg_target;
pub mod script;

pub use fs_source::{create_migration, FsSource};
pub use pg_target::{PgLockGuard, PgTarget, DEFAULT_TABLE};
pub use script::{split_sql_statements, SqlScript};
