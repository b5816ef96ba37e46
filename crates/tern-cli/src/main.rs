mod commands;
mod config;
mod logging;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;

use tern_core::{CancellationToken, Goal};

use config::{FileConfig, Overrides, Settings};
use logging::{init_logging, LogFormat, LoggingConfig};

#[derive(Parser)]
#[command(name = "tern")]
#[command(about = "Plan and run SQL migrations")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./tern.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Migrations directory
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Migrations tracking table
    #[arg(long, global = true)]
    table: Option<String>,

    /// Fail immediately when another process holds the migration lock
    #[arg(long, global = true)]
    fail_fast: bool,

    /// Give up waiting for the migration lock after this many seconds
    #[arg(long, global = true)]
    lock_timeout: Option<u64>,

    /// Ignore applied versions the migrations directory does not provide
    #[arg(long, global = true)]
    allow_missing: bool,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Copy)]
struct RunArgs {
    /// Print the plan without executing it
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty do/undo migration pair
    Create {
        /// Migration name
        name: String,
    },

    /// List applied and pending migrations
    Status,

    /// Apply every pending migration
    Migrate {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Apply or revert until exactly the migrations up to VERSION are applied
    To {
        /// Target version
        version: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Apply the next pending migrations
    Do {
        /// Number of migrations to apply
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        steps: u32,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Revert the most recently applied migrations
    Undo {
        /// Number of migrations to revert
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        steps: u32,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Revert every applied migration
    Rewind {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Revert every applied migration, then apply them all again
    Reset {
        #[command(flatten)]
        run: RunArgs,
    },
}

impl Commands {
    /// Planning goal and run options for plan-producing commands
    fn goal(&self) -> Option<(Goal, RunArgs)> {
        match self {
            Commands::Create { .. } | Commands::Status => None,
            Commands::Migrate { run } => Some((Goal::Latest, *run)),
            Commands::To { version, run } => Some((Goal::ToVersion(version.as_str().into()), *run)),
            Commands::Do { steps, run } => Some((Goal::Steps(i64::from(*steps)), *run)),
            Commands::Undo { steps, run } => Some((Goal::Steps(-i64::from(*steps)), *run)),
            Commands::Rewind { run } => Some((Goal::Rewind, *run)),
            Commands::Reset { run } => Some((Goal::Reset, *run)),
        }
    }
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let file = FileConfig::load(self.config.as_deref())?;
        let overrides = Overrides {
            database_url: self.database_url.clone(),
            dir: self.dir.clone(),
            table: self.table.clone(),
            fail_fast: self.fail_fast,
            lock_timeout_secs: self.lock_timeout,
            allow_missing: self.allow_missing,
        };
        Ok(Settings::resolve(file, |key| std::env::var(key).ok(), overrides))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(LoggingConfig::new(cli.verbose, cli.log_format))
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    let settings = cli.settings()?;

    if let Commands::Create { name } = &cli.command {
        commands::create::create(&settings.dir, name)?;
        return Ok(ExitCode::SUCCESS);
    }

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current migration");
                token.cancel();
            }
        }
    });

    let migrator = commands::connect(&settings, token).await?;

    match cli.command.goal() {
        Some((goal, run)) => {
            let completed = commands::run::run(&migrator, goal, run.dry_run).await?;
            Ok(if completed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        None => {
            commands::status::status(&migrator).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goal_of(args: &[&str]) -> Option<Goal> {
        Cli::try_parse_from(args)
            .unwrap()
            .command
            .goal()
            .map(|(goal, _)| goal)
    }

    #[test]
    fn test_goal_mapping() {
        assert_eq!(goal_of(&["tern", "migrate"]), Some(Goal::Latest));
        assert_eq!(
            goal_of(&["tern", "to", "20240101120000"]),
            Some(Goal::ToVersion("20240101120000".into()))
        );
        assert_eq!(goal_of(&["tern", "do"]), Some(Goal::Steps(1)));
        assert_eq!(goal_of(&["tern", "do", "--steps", "3"]), Some(Goal::Steps(3)));
        assert_eq!(goal_of(&["tern", "undo"]), Some(Goal::Steps(-1)));
        assert_eq!(goal_of(&["tern", "undo", "--steps", "2"]), Some(Goal::Steps(-2)));
        assert_eq!(goal_of(&["tern", "rewind"]), Some(Goal::Rewind));
        assert_eq!(goal_of(&["tern", "reset"]), Some(Goal::Reset));
        assert_eq!(goal_of(&["tern", "status"]), None);
        assert_eq!(goal_of(&["tern", "create", "add users"]), None);
    }

    #[test]
    fn test_zero_steps_rejected() {
        assert!(Cli::try_parse_from(["tern", "do", "--steps", "0"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tern",
            "migrate",
            "--dry-run",
            "--fail-fast",
            "--table",
            "schema_history",
        ])
        .unwrap();
        assert!(cli.fail_fast);
        assert_eq!(cli.table.as_deref(), Some("schema_history"));
        assert!(cli.command.goal().unwrap().1.dry_run);
    }
}
