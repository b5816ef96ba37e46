//! Migration Runner - Executes plans against a target
//!
//! The runner holds the target lock for the whole plan, verifies the plan
//! against the records it sees under that lock, and stops at the first
//! failing operation. It never retries.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{LockPolicy, MigrateConfig};
use crate::error::{MigrateError, MigrateResult, StepError};
use crate::migration::{AppliedRecord, Direction, Version};
use crate::plan::{Goal, Operation, Plan};
use crate::planner::Planner;
use crate::reporter::{RunReporter, TracingReporter};
use crate::source::Source;
use crate::target::Target;

/// Lifecycle of a single planned operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            OperationState::Pending => "pending",
            OperationState::Executing => "executing",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
        };
        f.write_str(state)
    }
}

/// Why a run ended before its last operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// An operation or a read under the lock failed
    Failed,
    /// Cancellation was requested between operations
    Cancelled,
    /// The target lock could not be acquired
    LockUnavailable,
    /// The target changed since the plan was computed
    PlanStale,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StopReason::Failed => "failed",
            StopReason::Cancelled => "cancelled",
            StopReason::LockUnavailable => "lock unavailable",
            StopReason::PlanStale => "plan stale",
        };
        f.write_str(reason)
    }
}

/// Outcome of a run: what completed, where it stopped and why
#[derive(Debug)]
pub struct RunReport {
    completed: Vec<Operation>,
    failed: Option<Operation>,
    error: Option<MigrateError>,
    stop_reason: Option<StopReason>,
    elapsed: Duration,
}

impl RunReport {
    fn finished(completed: Vec<Operation>, started: Instant) -> Self {
        Self {
            completed,
            failed: None,
            error: None,
            stop_reason: None,
            elapsed: started.elapsed(),
        }
    }

    fn stopped(
        completed: Vec<Operation>,
        failed: Option<Operation>,
        error: MigrateError,
        reason: StopReason,
        started: Instant,
    ) -> Self {
        Self {
            completed,
            failed,
            error: Some(error),
            stop_reason: Some(reason),
            elapsed: started.elapsed(),
        }
    }

    /// Operations that completed, in execution order
    pub fn completed(&self) -> &[Operation] {
        &self.completed
    }

    /// The operation that failed, if any
    pub fn failed(&self) -> Option<&Operation> {
        self.failed.as_ref()
    }

    /// The error that ended the run, if any
    pub fn error(&self) -> Option<&MigrateError> {
        self.error.as_ref()
    }

    /// Take ownership of the terminal error
    pub fn into_error(self) -> Option<MigrateError> {
        self.error
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Whether the run ended before its last operation
    pub fn stopped_early(&self) -> bool {
        self.stop_reason.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.stop_reason.is_none()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// State an operation of the reported plan ended in
    pub fn state_of(&self, operation: &Operation) -> OperationState {
        if self.completed.contains(operation) {
            OperationState::Completed
        } else if self.failed.as_ref() == Some(operation) {
            OperationState::Failed
        } else {
            OperationState::Pending
        }
    }
}

/// Executes plans produced by the [`Planner`]
#[derive(Clone)]
pub struct Runner {
    config: MigrateConfig,
    cancellation: CancellationToken,
    reporter: Arc<dyn RunReporter>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(MigrateConfig::default())
    }
}

impl Runner {
    /// Create a runner reporting through `tracing`
    pub fn new(config: MigrateConfig) -> Self {
        Self {
            config,
            cancellation: CancellationToken::new(),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Replace the run reporter
    pub fn with_reporter(mut self, reporter: impl RunReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Token that cancels this runner between operations
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Get the runner configuration
    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    /// Execute a plan computed earlier.
    ///
    /// The plan is replayed against the records read under the lock and
    /// rejected with `PlanStale` if any operation no longer fits.
    pub async fn run<S, T>(&self, plan: &Plan, source: &S, target: &T) -> RunReport
    where
        S: Source,
        T: Target<Content = S::Content>,
    {
        let started = Instant::now();

        if plan.is_empty() {
            debug!("Plan for {} is empty, skipping lock", plan.goal());
            let report = RunReport::finished(Vec::new(), started);
            self.reporter.after_run(&report);
            return report;
        }

        let _guard = match self.acquire(target).await {
            Ok(guard) => guard,
            Err(err) => return self.abort(err, started),
        };

        let records = match target.applied_records().await {
            Ok(records) => records,
            Err(err) => return self.abort(err, started),
        };
        if let Err(err) = verify_fresh(plan, records) {
            return self.abort(err, started);
        }

        self.execute(plan, source, target, started).await
    }

    /// Plan and execute a goal under a single lock acquisition.
    ///
    /// Planning errors are returned as `Err` before anything runs. Lock and
    /// execution failures are reported through the `RunReport`.
    pub async fn run_goal<S, T>(
        &self,
        planner: &Planner,
        goal: Goal,
        source: &S,
        target: &T,
    ) -> MigrateResult<RunReport>
    where
        S: Source,
        T: Target<Content = S::Content>,
    {
        let started = Instant::now();
        let available = source.list().await?;

        let _guard = match self.acquire(target).await {
            Ok(guard) => guard,
            Err(err) => return Ok(self.abort(err, started)),
        };

        let applied = target.applied_records().await?;
        let plan = planner.plan(&available, &applied, goal)?;

        if plan.is_empty() {
            info!("Nothing to do for {}", plan.goal());
            let report = RunReport::finished(Vec::new(), started);
            self.reporter.after_run(&report);
            return Ok(report);
        }

        Ok(self.execute(&plan, source, target, started).await)
    }

    async fn acquire<T: Target>(&self, target: &T) -> MigrateResult<T::Guard> {
        let policy = *self.config.get_lock_policy();
        let timeout = *self.config.get_lock_timeout();

        let lock = async {
            if policy == LockPolicy::Block && !timeout.is_zero() {
                tokio::time::timeout(timeout, target.lock(policy))
                    .await
                    .unwrap_or_else(|_| {
                        Err(MigrateError::LockUnavailable(format!(
                            "timed out after {}s waiting for the migration lock",
                            timeout.as_secs_f64()
                        )))
                    })
            } else {
                target.lock(policy).await
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(MigrateError::Cancelled),
            guard = lock => guard,
        }
    }

    async fn execute<S, T>(
        &self,
        plan: &Plan,
        source: &S,
        target: &T,
        started: Instant,
    ) -> RunReport
    where
        S: Source,
        T: Target<Content = S::Content>,
    {
        self.reporter.before_run(plan);
        let mut completed = Vec::with_capacity(plan.len());

        for (index, operation) in plan.iter().enumerate() {
            if self.cancellation.is_cancelled() {
                info!(
                    "Cancellation requested, stopping before {} of {}",
                    operation.direction(),
                    operation.version()
                );
                let report = RunReport::stopped(
                    completed,
                    None,
                    MigrateError::Cancelled,
                    StopReason::Cancelled,
                    started,
                );
                self.reporter.after_run(&report);
                return report;
            }

            self.reporter.before_operation(index, operation);

            match self.step(operation, source, target).await {
                Ok(()) => {
                    self.reporter
                        .after_operation(index, operation, OperationState::Completed, None);
                    completed.push(operation.clone());
                }
                Err(err) => {
                    self.reporter.after_operation(
                        index,
                        operation,
                        OperationState::Failed,
                        Some(&err),
                    );
                    let report = RunReport::stopped(
                        completed,
                        Some(operation.clone()),
                        err,
                        StopReason::Failed,
                        started,
                    );
                    self.reporter.after_run(&report);
                    return report;
                }
            }
        }

        let report = RunReport::finished(completed, started);
        self.reporter.after_run(&report);
        report
    }

    async fn step<S, T>(&self, operation: &Operation, source: &S, target: &T) -> MigrateResult<()>
    where
        S: Source,
        T: Target<Content = S::Content>,
    {
        let migration = operation.migration();
        let direction = operation.direction();

        let content = source
            .load(migration, direction)
            .await
            .map_err(|err| MigrateError::ContentLoadFailed {
                version: migration.version().clone(),
                direction,
                source: Box::new(err),
            })?;

        target
            .apply(migration, direction, content)
            .await
            .map_err(|err| match err {
                StepError::Execution(cause) => MigrateError::BackendExecutionFailed {
                    version: migration.version().clone(),
                    direction,
                    source: Box::new(cause),
                },
                StepError::Recording(cause) => {
                    error!(
                        version = %migration.version(),
                        direction = %direction,
                        "Migration executed but its state was not recorded; reconcile the target manually: {}",
                        cause
                    );
                    MigrateError::RecordingFailed {
                        version: migration.version().clone(),
                        direction,
                        source: Box::new(cause),
                    }
                }
            })
    }

    fn abort(&self, err: MigrateError, started: Instant) -> RunReport {
        let reason = match err {
            MigrateError::Cancelled => StopReason::Cancelled,
            MigrateError::LockUnavailable(_) => StopReason::LockUnavailable,
            MigrateError::PlanStale { .. } => StopReason::PlanStale,
            _ => StopReason::Failed,
        };
        let report = RunReport::stopped(Vec::new(), None, err, reason, started);
        self.reporter.after_run(&report);
        report
    }
}

/// Replay the plan over the applied-set read under the lock
fn verify_fresh(plan: &Plan, records: Vec<AppliedRecord>) -> MigrateResult<()> {
    let mut applied: HashSet<Version> = records.into_iter().map(|r| r.version).collect();

    for operation in plan {
        let fits = match operation.direction() {
            Direction::Apply => applied.insert(operation.version().clone()),
            Direction::Revert => applied.remove(operation.version()),
        };
        if !fits {
            return Err(MigrateError::PlanStale {
                version: operation.version().clone(),
                direction: operation.direction(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::Migration;

    fn plan_of(ops: &[(&str, Direction)], goal: Goal) -> Plan {
        Plan::new(
            ops.iter()
                .map(|(v, d)| Operation::new(Migration::new(*v, "m", true), *d))
                .collect(),
            goal,
        )
    }

    #[test]
    fn test_verify_fresh_accepts_reset_replay() {
        let plan = plan_of(
            &[
                ("2", Direction::Revert),
                ("1", Direction::Revert),
                ("1", Direction::Apply),
                ("2", Direction::Apply),
            ],
            Goal::Reset,
        );
        let records = vec![AppliedRecord::new("1"), AppliedRecord::new("2")];
        assert!(verify_fresh(&plan, records).is_ok());
    }

    #[test]
    fn test_verify_fresh_rejects_already_applied() {
        let plan = plan_of(&[("1", Direction::Apply), ("2", Direction::Apply)], Goal::Latest);
        let err = verify_fresh(&plan, vec![AppliedRecord::new("2")]).unwrap_err();
        assert!(matches!(
            err,
            MigrateError::PlanStale { ref version, direction: Direction::Apply } if version.as_str() == "2"
        ));
    }

    #[test]
    fn test_verify_fresh_rejects_missing_revert() {
        let plan = plan_of(&[("3", Direction::Revert)], Goal::Steps(-1));
        let err = verify_fresh(&plan, Vec::new()).unwrap_err();
        assert_eq!(err.class(), "PlanStale");
    }

    #[test]
    fn test_report_states() {
        let first = Operation::new(Migration::new("1", "a", true), Direction::Apply);
        let second = Operation::new(Migration::new("2", "b", true), Direction::Apply);
        let third = Operation::new(Migration::new("3", "c", true), Direction::Apply);

        let report = RunReport::stopped(
            vec![first.clone()],
            Some(second.clone()),
            MigrateError::Backend("boom".to_string()),
            StopReason::Failed,
            Instant::now(),
        );

        assert!(report.stopped_early());
        assert!(!report.is_success());
        assert_eq!(report.state_of(&first), OperationState::Completed);
        assert_eq!(report.state_of(&second), OperationState::Failed);
        assert_eq!(report.state_of(&third), OperationState::Pending);
    }

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::LockUnavailable.to_string(), "lock unavailable");
        assert_eq!(OperationState::Executing.to_string(), "executing");
    }
}
