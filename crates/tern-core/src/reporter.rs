//! Observer hooks around a migration run

use tracing::{error, info, warn};

use crate::error::MigrateError;
use crate::plan::{Operation, Plan};
use crate::runner::{OperationState, RunReport, StopReason};

/// Hooks invoked by the runner. Every hook defaults to doing nothing.
pub trait RunReporter: Send + Sync {
    /// Called once the lock is held and the plan is known to be fresh
    fn before_run(&self, _plan: &Plan) {}

    /// Called when an operation enters `Executing`
    fn before_operation(&self, _index: usize, _operation: &Operation) {}

    /// Called when an operation reaches `Completed` or `Failed`
    fn after_operation(
        &self,
        _index: usize,
        _operation: &Operation,
        _state: OperationState,
        _error: Option<&MigrateError>,
    ) {
    }

    /// Called with the final report on every exit path
    fn after_run(&self, _report: &RunReport) {}
}

/// Reporter that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl RunReporter for NoopReporter {}

/// Reporter emitting structured `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl RunReporter for TracingReporter {
    fn before_run(&self, plan: &Plan) {
        info!(goal = %plan.goal(), operations = plan.len(), "Starting migration run");
    }

    fn before_operation(&self, index: usize, operation: &Operation) {
        info!(
            index,
            version = %operation.version(),
            direction = %operation.direction(),
            "Running migration {}",
            operation.migration()
        );
    }

    fn after_operation(
        &self,
        _index: usize,
        operation: &Operation,
        state: OperationState,
        error: Option<&MigrateError>,
    ) {
        match (state, error) {
            (OperationState::Failed, Some(err)) => error!(
                version = %operation.version(),
                direction = %operation.direction(),
                class = err.class(),
                "Migration failed: {}",
                err
            ),
            _ => info!(
                version = %operation.version(),
                direction = %operation.direction(),
                "Migration {}",
                state
            ),
        }
    }

    fn after_run(&self, report: &RunReport) {
        let elapsed_ms = report.elapsed().as_millis() as u64;
        match report.stop_reason() {
            None => info!(
                completed = report.completed().len(),
                elapsed_ms,
                "Migration run finished"
            ),
            Some(StopReason::Cancelled) => warn!(
                completed = report.completed().len(),
                elapsed_ms,
                "Migration run cancelled"
            ),
            Some(reason) => error!(
                completed = report.completed().len(),
                elapsed_ms,
                reason = %reason,
                "Migration run stopped early"
            ),
        }
    }
}
