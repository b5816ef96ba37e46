use anyhow::Result;

use super::output::status_lines;
use super::SqlMigrator;

pub async fn status(migrator: &SqlMigrator) -> Result<()> {
    let status = migrator.status().await?;

    println!("Migrations in {}", migrator.source().dir().display());
    for line in status_lines(&status) {
        println!("{}", line);
    }
    Ok(())
}
