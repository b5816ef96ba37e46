//! Human-readable rendering of plans, reports and status

use console::style;
use url::Url;

use tern_core::{Direction, Plan, RunReport, Status, StopReason};

/// Hide the password of a database URL
pub fn mask_database_url(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("****")).is_err() {
                return "<invalid database url>".to_string();
            }
            url.to_string()
        }
        Err(_) => "<invalid database url>".to_string(),
    }
}

fn arrow(direction: Direction) -> &'static str {
    match direction {
        Direction::Apply => "↑",
        Direction::Revert => "↓",
    }
}

pub fn plan_lines(plan: &Plan) -> Vec<String> {
    let mut lines = vec![format!("Plan ({})", plan.describe())];
    for operation in plan {
        lines.push(format!("  {} {}", arrow(operation.direction()), operation));
    }
    lines
}

pub fn print_plan(plan: &Plan) {
    for line in plan_lines(plan) {
        println!("{}", line);
    }
}

pub fn status_lines(status: &Status) -> Vec<String> {
    let mut lines = Vec::new();

    for (migration, record) in &status.applied {
        lines.push(format!(
            "  {} {}  applied {}",
            style("✅").green(),
            migration,
            record.applied_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    for migration in &status.pending {
        lines.push(format!("  {} {}  pending", style("⏳").yellow(), migration));
    }
    for record in &status.orphaned {
        lines.push(format!(
            "  {} {}  applied {} but missing from the source",
            style("⚠️").red(),
            record.version,
            record.applied_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }

    if lines.is_empty() {
        lines.push("  No migrations found".to_string());
    }

    lines.push(format!(
        "{} applied, {} pending",
        status.applied.len(),
        status.pending.len()
    ));
    lines
}

pub fn report_lines(report: &RunReport) -> Vec<String> {
    let mut lines = Vec::new();

    for operation in report.completed() {
        lines.push(format!(
            "  {} {} {}",
            style("✅").green(),
            arrow(operation.direction()),
            operation
        ));
    }

    if let Some(operation) = report.failed() {
        lines.push(format!(
            "  {} {} {}",
            style("❌").red(),
            arrow(operation.direction()),
            operation
        ));
    }

    let count = report.completed().len();
    let noun = if count == 1 { "operation" } else { "operations" };
    let elapsed = report.elapsed().as_millis();

    match report.stop_reason() {
        None if count == 0 => lines.push("Nothing to do".to_string()),
        None => lines.push(format!("Completed {} {} in {}ms", count, noun, elapsed)),
        Some(reason) => {
            let detail = report
                .error()
                .map(|err| format!("{} ({})", err, err.class()))
                .unwrap_or_default();
            lines.push(format!(
                "Stopped early ({}) after {} {}: {}",
                reason, count, noun, detail
            ));
            if reason == StopReason::Failed
                && report
                    .error()
                    .is_some_and(|err| err.requires_manual_intervention())
            {
                lines.push(
                    "The backend and the migrations table disagree; reconcile them manually before rerunning"
                        .to_string(),
                );
            }
        }
    }

    lines
}

pub fn print_report(report: &RunReport) {
    for line in report_lines(report) {
        if report.stopped_early() {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
}
