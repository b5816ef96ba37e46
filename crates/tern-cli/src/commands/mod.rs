pub mod create;
pub mod output;
pub mod run;
pub mod status;

use anyhow::{Context, Result};
use tracing::info;

use tern_core::{CancellationToken, Migrator};
use tern_sql::{FsSource, PgTarget};

use crate::config::Settings;

pub type SqlMigrator = Migrator<FsSource, PgTarget>;

/// Connect to the configured database and pair it with the migrations directory
pub async fn connect(settings: &Settings, token: CancellationToken) -> Result<SqlMigrator> {
    let database_url = settings.require_database_url()?;
    info!(
        "Connecting to {} (table {})",
        output::mask_database_url(database_url),
        settings.table
    );

    let target = PgTarget::connect(database_url, &settings.table)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to {}",
                output::mask_database_url(database_url)
            )
        })?;

    Ok(
        Migrator::with_config(FsSource::new(&settings.dir), target, settings.migrate.clone())
            .with_cancellation(token),
    )
}
