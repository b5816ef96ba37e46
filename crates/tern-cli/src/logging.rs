//! Logging setup for the `tern` binary

use clap::ValueEnum;
use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration for the CLI
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub env_filter: String,
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn new(verbose: bool, format: LogFormat) -> Self {
        let level = if verbose { "debug" } else { "info" };
        Self {
            env_filter: format!("warn,tern={0},tern_core={0},tern_sql={0}", level),
            format,
        }
    }
}

/// Install the global subscriber; logs go to stderr so command output stays clean
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.env_filter))?;

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?,
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).with_target(false))
            .try_init()?,
    }

    tracing::debug!(
        "Logging initialized (filter: {}, format: {:?})",
        config.env_filter,
        config.format
    );
    Ok(())
}
