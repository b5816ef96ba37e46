//! Migration Planner - Diffs available migrations against applied records
//!
//! The planner is a pure computation over two snapshots: the migrations a
//! source provides and the records a target reports as applied. It never
//! touches a backend.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::{MigrateError, MigrateResult};
use crate::migration::{AppliedRecord, Direction, Migration, Version};
use crate::plan::{Goal, Operation, Plan};

/// Planner options
#[derive(Debug, Clone, Default)]
pub struct PlannerOptions {
    /// Ignore applied records whose version the source does not provide
    pub allow_missing: bool,
}

/// Read-only view of applied and pending migrations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    /// Applied migrations with their records, ascending
    pub applied: Vec<(Migration, AppliedRecord)>,
    /// Migrations not yet applied, ascending
    pub pending: Vec<Migration>,
    /// Records the source cannot reproduce, ascending
    pub orphaned: Vec<AppliedRecord>,
}

impl Status {
    /// Most recent applied migration
    pub fn head(&self) -> Option<&Migration> {
        self.applied.last().map(|(migration, _)| migration)
    }

    /// Whether every available migration is applied
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Available migrations split by applied state, both ascending
struct Partition<'a> {
    available: Vec<&'a Migration>,
    applied: Vec<(&'a Migration, &'a AppliedRecord)>,
    pending: Vec<&'a Migration>,
    orphaned: Vec<&'a AppliedRecord>,
}

/// Computes ordered execution plans
#[derive(Debug, Clone, Default)]
pub struct Planner {
    options: PlannerOptions,
}

impl Planner {
    /// Create a planner that fails closed on missing migrations
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a planner with custom options
    pub fn with_options(options: PlannerOptions) -> Self {
        Self { options }
    }

    /// Toggle the missing-migration override
    pub fn allow_missing(mut self, allow: bool) -> Self {
        self.options.allow_missing = allow;
        self
    }

    /// Get the planner options
    pub fn options(&self) -> &PlannerOptions {
        &self.options
    }

    /// Compute the plan that takes `applied` to `goal`
    pub fn plan(
        &self,
        available: &[Migration],
        applied: &[AppliedRecord],
        goal: Goal,
    ) -> MigrateResult<Plan> {
        let partition = self.partition(available, applied)?;

        if let Some(record) = partition.orphaned.first() {
            if !self.options.allow_missing {
                return Err(MigrateError::MissingMigration {
                    version: record.version.clone(),
                });
            }
            for record in &partition.orphaned {
                warn!(
                    "Ignoring applied migration {} that the source does not provide",
                    record.version
                );
            }
        }

        let operations = match &goal {
            Goal::Latest => apply_all(partition.pending.iter().copied()),
            Goal::ToVersion(version) => {
                if !partition.available.iter().any(|m| m.version() == version) {
                    return Err(MigrateError::UnknownVersion {
                        version: version.clone(),
                    });
                }

                let mut operations = revert_all(
                    partition
                        .applied
                        .iter()
                        .rev()
                        .map(|(m, _)| *m)
                        .filter(|m| m.version() > version),
                );
                operations.extend(apply_all(
                    partition
                        .pending
                        .iter()
                        .copied()
                        .filter(|m| m.version() <= version),
                ));
                operations
            }
            Goal::Steps(n) if *n > 0 => {
                let count = usize::try_from(*n).unwrap_or(usize::MAX);
                apply_all(partition.pending.iter().copied().take(count))
            }
            Goal::Steps(n) if *n < 0 => {
                let count = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX);
                revert_all(partition.applied.iter().rev().map(|(m, _)| *m).take(count))
            }
            Goal::Steps(_) => Vec::new(),
            Goal::Rewind => revert_all(partition.applied.iter().rev().map(|(m, _)| *m)),
            Goal::Reset => {
                let mut operations =
                    revert_all(partition.applied.iter().rev().map(|(m, _)| *m));
                operations.extend(apply_all(partition.available.iter().copied()));
                operations
            }
        };

        // The whole plan fails if any revert is impossible
        if let Some(op) = operations
            .iter()
            .find(|op| op.direction() == Direction::Revert && !op.migration().has_undo())
        {
            return Err(MigrateError::NoUndoAvailable {
                version: op.version().clone(),
            });
        }

        if let Some((head, _)) = partition.applied.last() {
            for op in operations
                .iter()
                .filter(|op| op.direction() == Direction::Apply && op.version() < head.version())
            {
                warn!(
                    "Migration {} is older than the applied head {} and will be applied out of order",
                    op.version(),
                    head.version()
                );
            }
        }

        let plan = Plan::new(operations, goal);
        debug!("Planned {}", plan.describe());
        Ok(plan)
    }

    /// Partition available migrations without building a plan
    pub fn status(
        &self,
        available: &[Migration],
        applied: &[AppliedRecord],
    ) -> MigrateResult<Status> {
        let partition = self.partition(available, applied)?;

        Ok(Status {
            applied: partition
                .applied
                .into_iter()
                .map(|(m, r)| (m.clone(), r.clone()))
                .collect(),
            pending: partition.pending.into_iter().cloned().collect(),
            orphaned: partition.orphaned.into_iter().cloned().collect(),
        })
    }

    fn partition<'a>(
        &self,
        available: &'a [Migration],
        applied: &'a [AppliedRecord],
    ) -> MigrateResult<Partition<'a>> {
        let mut sorted: Vec<&Migration> = available.iter().collect();
        sorted.sort_by(|a, b| a.version().cmp(b.version()));

        // Numerically equal tokens sort next to each other
        if let Some(pair) = sorted
            .windows(2)
            .find(|w| w[0].version().collides_with(w[1].version()))
        {
            return Err(MigrateError::DuplicateVersion {
                version: pair[0].version().clone(),
            });
        }

        let records: HashMap<&Version, &AppliedRecord> =
            applied.iter().map(|r| (&r.version, r)).collect();
        let known: HashSet<&Version> = sorted.iter().map(|m| m.version()).collect();

        let mut orphaned: Vec<&AppliedRecord> = records
            .values()
            .copied()
            .filter(|r| !known.contains(&r.version))
            .collect();
        orphaned.sort_by(|a, b| a.version.cmp(&b.version));

        let mut applied_migrations = Vec::with_capacity(records.len());
        let mut pending = Vec::with_capacity(sorted.len());
        for migration in &sorted {
            match records.get(migration.version()) {
                Some(record) => applied_migrations.push((*migration, *record)),
                None => pending.push(*migration),
            }
        }

        Ok(Partition {
            available: sorted,
            applied: applied_migrations,
            pending,
            orphaned,
        })
    }
}

fn apply_all<'a>(migrations: impl Iterator<Item = &'a Migration>) -> Vec<Operation> {
    migrations
        .map(|m| Operation::new(m.clone(), Direction::Apply))
        .collect()
}

fn revert_all<'a>(migrations: impl Iterator<Item = &'a Migration>) -> Vec<Operation> {
    migrations
        .map(|m| Operation::new(m.clone(), Direction::Revert))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrations(versions: &[&str]) -> Vec<Migration> {
        versions
            .iter()
            .map(|v| Migration::new(*v, format!("migration {}", v), true))
            .collect()
    }

    fn records(versions: &[&str]) -> Vec<AppliedRecord> {
        versions.iter().map(|v| AppliedRecord::new(*v)).collect()
    }

    fn summary(plan: &Plan) -> Vec<String> {
        plan.iter()
            .map(|op| format!("{} {}", op.direction(), op.version()))
            .collect()
    }

    #[test]
    fn test_latest_applies_pending_in_order() {
        let available = migrations(&["v1", "v2", "v3"]);
        let plan = Planner::new()
            .plan(&available, &records(&["v1"]), Goal::Latest)
            .unwrap();
        assert_eq!(summary(&plan), vec!["do v2", "do v3"]);
    }

    #[test]
    fn test_latest_sorts_unordered_source() {
        let available = migrations(&["3", "1", "10", "2"]);
        let plan = Planner::new().plan(&available, &[], Goal::Latest).unwrap();
        assert_eq!(summary(&plan), vec!["do 1", "do 2", "do 3", "do 10"]);
    }

    #[test]
    fn test_latest_fills_gaps_below_head() {
        let available = migrations(&["1", "2", "3"]);
        let plan = Planner::new()
            .plan(&available, &records(&["1", "3"]), Goal::Latest)
            .unwrap();
        assert_eq!(summary(&plan), vec!["do 2"]);
    }

    #[test]
    fn test_latest_is_empty_when_up_to_date() {
        let available = migrations(&["1", "2"]);
        let plan = Planner::new()
            .plan(&available, &records(&["2", "1"]), Goal::Latest)
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_to_version_reverts_descending() {
        let available = migrations(&["v1", "v2", "v3"]);
        let plan = Planner::new()
            .plan(
                &available,
                &records(&["v1", "v2", "v3"]),
                Goal::ToVersion("v1".into()),
            )
            .unwrap();
        assert_eq!(summary(&plan), vec!["undo v3", "undo v2"]);
    }

    #[test]
    fn test_to_version_applies_up_to_target() {
        let available = migrations(&["1", "2", "3", "4"]);
        let plan = Planner::new()
            .plan(&available, &records(&["1"]), Goal::ToVersion("3".into()))
            .unwrap();
        assert_eq!(summary(&plan), vec!["do 2", "do 3"]);
    }

    #[test]
    fn test_to_version_at_head_is_empty() {
        let available = migrations(&["1", "2", "3"]);
        let plan = Planner::new()
            .plan(&available, &records(&["1", "2"]), Goal::ToVersion("2".into()))
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_to_version_across_gap_reverts_then_applies() {
        let available = migrations(&["1", "2", "3"]);
        let plan = Planner::new()
            .plan(&available, &records(&["1", "3"]), Goal::ToVersion("2".into()))
            .unwrap();
        assert_eq!(summary(&plan), vec!["undo 3", "do 2"]);
    }

    #[test]
    fn test_to_unknown_version_is_rejected() {
        let available = migrations(&["1", "2"]);
        let err = Planner::new()
            .plan(&available, &[], Goal::ToVersion("9".into()))
            .unwrap_err();
        assert!(matches!(err, MigrateError::UnknownVersion { .. }));
    }

    #[test]
    fn test_steps_forward_is_capped_by_pending() {
        let available = migrations(&["1", "2", "3"]);
        let plan = Planner::new()
            .plan(&available, &records(&["1"]), Goal::Steps(1))
            .unwrap();
        assert_eq!(summary(&plan), vec!["do 2"]);

        let plan = Planner::new()
            .plan(&available, &records(&["1"]), Goal::Steps(10))
            .unwrap();
        assert_eq!(summary(&plan), vec!["do 2", "do 3"]);
    }

    #[test]
    fn test_steps_backward_reverts_most_recent_first() {
        let available = migrations(&["1", "2", "3"]);
        let plan = Planner::new()
            .plan(&available, &records(&["1", "2", "3"]), Goal::Steps(-2))
            .unwrap();
        assert_eq!(summary(&plan), vec!["undo 3", "undo 2"]);

        let plan = Planner::new()
            .plan(&available, &records(&["1"]), Goal::Steps(-5))
            .unwrap();
        assert_eq!(summary(&plan), vec!["undo 1"]);
    }

    #[test]
    fn test_zero_steps_is_empty() {
        let available = migrations(&["1"]);
        let plan = Planner::new().plan(&available, &[], Goal::Steps(0)).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_extreme_step_counts_do_not_overflow() {
        let available = migrations(&["1", "2"]);
        let plan = Planner::new()
            .plan(&available, &[], Goal::Steps(i64::MAX))
            .unwrap();
        assert_eq!(plan.len(), 2);

        let plan = Planner::new()
            .plan(&available, &records(&["1", "2"]), Goal::Steps(i64::MIN))
            .unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_revert_without_undo_fails_whole_plan() {
        let available = vec![
            Migration::new("1", "first", true),
            Migration::new("2", "second", false),
        ];
        let err = Planner::new()
            .plan(&available, &records(&["1", "2"]), Goal::Steps(-1))
            .unwrap_err();
        assert!(matches!(err, MigrateError::NoUndoAvailable { ref version } if version.as_str() == "2"));

        // Revertible migrations in the same plan do not make it partial
        let err = Planner::new()
            .plan(&available, &records(&["1", "2"]), Goal::Rewind)
            .unwrap_err();
        assert!(matches!(err, MigrateError::NoUndoAvailable { .. }));
    }

    #[test]
    fn test_duplicate_versions_are_rejected() {
        let available = vec![
            Migration::new("1", "first", true),
            Migration::new("2", "second", true),
            Migration::new("1", "first again", true),
        ];
        let err = Planner::new()
            .plan(&available, &[], Goal::Latest)
            .unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateVersion { ref version } if version.as_str() == "1"));
    }

    #[test]
    fn test_leading_zero_versions_are_duplicates() {
        let available = vec![
            Migration::new("01", "padded", true),
            Migration::new("2", "second", true),
            Migration::new("1", "plain", true),
        ];
        let err = Planner::new()
            .plan(&available, &[], Goal::Latest)
            .unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateVersion { ref version } if version.as_str() == "01"));
    }

    #[test]
    fn test_missing_migration_fails_closed() {
        let available = migrations(&["1", "2"]);
        let err = Planner::new()
            .plan(&available, &records(&["1", "0"]), Goal::Latest)
            .unwrap_err();
        assert!(matches!(err, MigrateError::MissingMigration { ref version } if version.as_str() == "0"));
    }

    #[test]
    fn test_missing_migration_override() {
        let available = migrations(&["1", "2"]);
        let plan = Planner::new()
            .allow_missing(true)
            .plan(&available, &records(&["1", "0"]), Goal::Latest)
            .unwrap();
        assert_eq!(summary(&plan), vec!["do 2"]);
    }

    #[test]
    fn test_rewind_and_reset() {
        let available = migrations(&["1", "2", "3"]);
        let applied = records(&["1", "2"]);

        let plan = Planner::new()
            .plan(&available, &applied, Goal::Rewind)
            .unwrap();
        assert_eq!(summary(&plan), vec!["undo 2", "undo 1"]);

        let plan = Planner::new()
            .plan(&available, &applied, Goal::Reset)
            .unwrap();
        assert_eq!(
            summary(&plan),
            vec!["undo 2", "undo 1", "do 1", "do 2", "do 3"]
        );
    }

    #[test]
    fn test_latest_yields_exact_difference_for_every_subset() {
        let versions = ["1", "2", "3", "4"];
        let available = migrations(&versions);

        for mask in 0u32..(1 << versions.len()) {
            let applied: Vec<&str> = versions
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, v)| *v)
                .collect();
            let expected: Vec<String> = versions
                .iter()
                .filter(|v| !applied.contains(v))
                .map(|v| format!("do {}", v))
                .collect();

            let plan = Planner::new()
                .plan(&available, &records(&applied), Goal::Latest)
                .unwrap();
            assert_eq!(summary(&plan), expected, "applied subset {:?}", applied);
        }
    }

    #[test]
    fn test_status_partitions_without_planning() {
        let available = migrations(&["1", "2", "3"]);
        let status = Planner::new()
            .status(&available, &records(&["2", "9"]))
            .unwrap();

        let applied: Vec<&str> = status.applied.iter().map(|(m, _)| m.version().as_str()).collect();
        let pending: Vec<&str> = status.pending.iter().map(|m| m.version().as_str()).collect();
        assert_eq!(applied, vec!["2"]);
        assert_eq!(pending, vec!["1", "3"]);
        assert_eq!(status.orphaned.len(), 1);
        assert_eq!(status.head().map(|m| m.version().as_str()), Some("2"));
        assert!(!status.is_up_to_date());
    }
}
