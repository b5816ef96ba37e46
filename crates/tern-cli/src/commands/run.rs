use anyhow::Result;
use tracing::info;

use tern_core::{Goal, Migrator, Source, Target};

use super::output::{print_plan, print_report};

/// Plan a goal and either print the plan or execute it.
///
/// Returns whether every planned operation completed.
pub async fn run<S, T>(migrator: &Migrator<S, T>, goal: Goal, dry_run: bool) -> Result<bool>
where
    S: Source,
    T: Target<Content = S::Content>,
{
    if dry_run {
        let plan = migrator.plan(goal).await?;
        print_plan(&plan);
        return Ok(true);
    }

    let report = migrator.migrate(goal).await?;
    print_report(&report);

    if report.stopped_early() {
        info!("Run stopped early: {:?}", report.stop_reason());
        Ok(false)
    } else {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::{Direction, FailurePoint, MemorySource, MemoryTarget};

    fn source() -> MemorySource {
        MemorySource::new()
            .with_statements("1", "one", "up", "down")
            .with_statements("2", "two", "up", "down")
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let target = MemoryTarget::new();
        let migrator = Migrator::new(source(), target.clone());

        assert!(run(&migrator, Goal::Latest, true).await.unwrap());
        assert!(target.executed().is_empty());
    }

    #[tokio::test]
    async fn test_failed_run_exits_non_zero() {
        let target = MemoryTarget::new();
        target.fail_on("2", Direction::Apply, FailurePoint::Execute);
        let migrator = Migrator::new(source(), target.clone());

        assert!(!run(&migrator, Goal::Latest, false).await.unwrap());
        assert_eq!(target.applied_versions().len(), 1);
    }

    #[tokio::test]
    async fn test_planning_error_is_an_error() {
        let migrator = Migrator::new(source(), MemoryTarget::new());
        assert!(run(&migrator, Goal::ToVersion("9".into()), false)
            .await
            .is_err());
    }
}
