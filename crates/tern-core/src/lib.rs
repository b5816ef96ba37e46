//! # tern-core
//!
//! Storage-agnostic migration planning and execution.
//!
//! ## Features
//!
//! - **Pure planning**: Diff available migrations against applied records for a goal
//! - **Locked execution**: One runner at a time per target, checked for stale plans
//! - **Failure containment**: Stop at the first failing operation with a precise report
//! - **Pluggable storage**: Any backend implementing [`Source`] and [`Target`]
//!
//! ## Quick Start
//!
//! ```rust
//! use tern_core::{Goal, MemorySource, MemoryTarget, Migrator};
//!
//! # tokio_test::block_on(async {
//! let source = MemorySource::new()
//!     .with_statements("1", "create users", "CREATE TABLE users", "DROP TABLE users")
//!     .with_statements("2", "add email", "ALTER TABLE users ADD email", "ALTER TABLE users DROP email");
//! let target = MemoryTarget::new();
//!
//! let migrator = Migrator::new(source, target.clone());
//! let report = migrator.migrate(Goal::Latest).await.unwrap();
//! assert!(report.is_success());
//! assert_eq!(report.completed().len(), 2);
//!
//! let report = migrator.migrate(Goal::Steps(-1)).await.unwrap();
//! assert_eq!(report.completed().len(), 1);
//! assert_eq!(target.applied_versions().len(), 1);
//! # });
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod migration;
pub mod migrator;
pub mod plan;
pub mod planner;
pub mod reporter;
pub mod runner;
pub mod source;
pub mod target;

pub use backends::*;
pub use config::*;
pub use error::*;
pub use migration::*;
pub use migrator::*;
pub use plan::*;
pub use planner::*;
pub use reporter::*;
pub use runner::*;
pub use source::*;
pub use target::*;

pub use tokio_util::sync::CancellationToken;
