//! Migrator - Pairs a source with a target behind one configuration

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::MigrateConfig;
use crate::error::MigrateResult;
use crate::plan::{Goal, Plan};
use crate::planner::{Planner, PlannerOptions, Status};
use crate::reporter::RunReporter;
use crate::runner::{RunReport, Runner};
use crate::source::Source;
use crate::target::Target;

/// Convenience façade over [`Planner`] and [`Runner`]
pub struct Migrator<S, T> {
    source: S,
    target: T,
    planner: Planner,
    runner: Runner,
}

impl<S, T> Migrator<S, T>
where
    S: Source,
    T: Target<Content = S::Content>,
{
    /// Create a migrator with default configuration
    pub fn new(source: S, target: T) -> Self {
        Self::with_config(source, target, MigrateConfig::default())
    }

    /// Create a migrator with custom configuration
    pub fn with_config(source: S, target: T, config: MigrateConfig) -> Self {
        let planner = Planner::with_options(PlannerOptions {
            allow_missing: *config.get_allow_missing(),
        });
        Self {
            source,
            target,
            planner,
            runner: Runner::new(config),
        }
    }

    /// Replace the run reporter
    pub fn with_reporter(mut self, reporter: impl RunReporter + 'static) -> Self {
        self.runner = self.runner.with_reporter(reporter);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.runner = self.runner.with_cancellation(token);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// List applied and pending migrations
    pub async fn status(&self) -> MigrateResult<Status> {
        self.target.prepare().await?;
        let available = self.source.list().await?;
        let applied = self.target.applied_records().await?;
        self.planner.status(&available, &applied)
    }

    /// Compute a plan without executing it
    pub async fn plan(&self, goal: Goal) -> MigrateResult<Plan> {
        self.target.prepare().await?;
        let available = self.source.list().await?;
        let applied = self.target.applied_records().await?;
        self.planner.plan(&available, &applied, goal)
    }

    /// Execute a previously computed plan
    pub async fn run(&self, plan: &Plan) -> RunReport {
        self.runner.run(plan, &self.source, &self.target).await
    }

    /// Plan and execute a goal while holding the target lock throughout
    pub async fn migrate(&self, goal: Goal) -> MigrateResult<RunReport> {
        self.target.prepare().await?;
        info!("Migrating {}", goal);
        self.runner
            .run_goal(&self.planner, goal, &self.source, &self.target)
            .await
    }
}
