use anyhow::Result;
use std::path::Path;

use tern_sql::create_migration;

pub fn create(dir: &Path, name: &str) -> Result<()> {
    let (do_path, undo_path) = create_migration(dir, name)?;

    println!("Created migration:");
    println!("  {}", do_path.display());
    println!("  {}", undo_path.display());
    Ok(())
}
