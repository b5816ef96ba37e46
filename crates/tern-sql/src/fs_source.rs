//! Filesystem source - SQL migrations stored as files in one directory
//!
//! Accepted layouts, per version:
//!
//! - `<version>_<name>.do.sql` and optionally `<version>_<name>.undo.sql`
//!   (`.up.sql` / `.down.sql` are accepted as aliases)
//! - a single `<version>_<name>.sql`, optionally split into `-- Up migration`
//!   and `-- Down migration` sections
//!
//! Underscores in the name become spaces.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use tern_core::{Direction, MigrateError, MigrateResult, Migration, Source, Version};

use crate::script::SqlScript;

const FILE_NAME_PATTERN: &str = r"^(\d+)_(.*?)(\.(do|undo|down|up))?\.sql$";

/// Which part of a file holds a direction's SQL
#[derive(Debug, Clone, PartialEq, Eq)]
enum FilePart {
    Whole(PathBuf),
    UpSection(PathBuf),
    DownSection(PathBuf),
}

impl FilePart {
    fn path(&self) -> &Path {
        match self {
            FilePart::Whole(path) | FilePart::UpSection(path) | FilePart::DownSection(path) => {
                path
            }
        }
    }

    fn read(&self) -> MigrateResult<SqlScript> {
        let content = fs::read_to_string(self.path()).map_err(|e| {
            MigrateError::Source(format!(
                "Failed to read migration file {}: {}",
                self.path().display(),
                e
            ))
        })?;

        let sql = match self {
            FilePart::Whole(_) => content,
            FilePart::UpSection(_) => parse_sections(&content).up,
            FilePart::DownSection(_) => parse_sections(&content).down.unwrap_or_default(),
        };
        Ok(SqlScript::new(sql))
    }
}

#[derive(Debug, Default)]
struct MigrationFiles {
    name: String,
    apply: Option<FilePart>,
    revert: Option<FilePart>,
}

/// Source reading `.sql` files from a migrations directory
#[derive(Debug, Clone)]
pub struct FsSource {
    dir: PathBuf,
}

impl FsSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the migrations directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn scan(&self) -> MigrateResult<BTreeMap<Version, MigrationFiles>> {
        let mut migrations: BTreeMap<Version, MigrationFiles> = BTreeMap::new();

        if !self.dir.exists() {
            debug!("Migrations directory {} does not exist", self.dir.display());
            return Ok(migrations);
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            MigrateError::Source(format!(
                "Failed to read migrations directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let pattern = Regex::new(FILE_NAME_PATTERN).map_err(|e| {
            MigrateError::Source(format!("Failed to compile migration file pattern: {}", e))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                MigrateError::Source(format!("Failed to read directory entry: {}", e))
            })?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                paths.push(entry.path());
            }
        }
        // Stable duplicate reporting regardless of directory order
        paths.sort();

        for path in paths {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(captures) = pattern.captures(file_name) else {
                continue;
            };

            let version = Version::new(&captures[1]);
            let name = captures[2].replace('_', " ");
            let kind = captures.get(4).map(|m| m.as_str()).unwrap_or("");

            let files = migrations.entry(version.clone()).or_insert_with(|| MigrationFiles {
                name,
                ..MigrationFiles::default()
            });

            match kind {
                "do" | "up" => set_part(&mut files.apply, FilePart::Whole(path.clone()), &version)?,
                "undo" | "down" => {
                    set_part(&mut files.revert, FilePart::Whole(path.clone()), &version)?
                }
                _ => {
                    let content = fs::read_to_string(&path).map_err(|e| {
                        MigrateError::Source(format!(
                            "Failed to read migration file {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                    let sections = parse_sections(&content);

                    if sections.marked {
                        set_part(&mut files.apply, FilePart::UpSection(path.clone()), &version)?;
                        if sections.down.is_some() {
                            set_part(
                                &mut files.revert,
                                FilePart::DownSection(path.clone()),
                                &version,
                            )?;
                        }
                    } else {
                        set_part(&mut files.apply, FilePart::Whole(path.clone()), &version)?;
                    }
                }
            }
        }

        if let Some((version, _)) = migrations.iter().find(|(_, files)| files.apply.is_none()) {
            return Err(MigrateError::Source(format!(
                "Migration {} has an undo file but no do file",
                version
            )));
        }

        Ok(migrations)
    }
}

fn set_part(slot: &mut Option<FilePart>, part: FilePart, version: &Version) -> MigrateResult<()> {
    if let Some(existing) = slot {
        return Err(MigrateError::Source(format!(
            "Migration {} defined twice: {} and {}",
            version,
            existing.path().display(),
            part.path().display()
        )));
    }
    *slot = Some(part);
    Ok(())
}

#[async_trait]
impl Source for FsSource {
    type Content = SqlScript;

    async fn list(&self) -> MigrateResult<Vec<Migration>> {
        let migrations = self.scan()?;

        Ok(migrations
            .into_iter()
            .map(|(version, files)| Migration::new(version, files.name, files.revert.is_some()))
            .collect())
    }

    async fn load(&self, migration: &Migration, direction: Direction) -> MigrateResult<SqlScript> {
        let not_found = || MigrateError::ContentNotFound {
            version: migration.version().clone(),
            direction,
        };

        let mut migrations = self.scan()?;
        let files = migrations.remove(migration.version()).ok_or_else(not_found)?;
        let part = match direction {
            Direction::Apply => files.apply,
            Direction::Revert => files.revert,
        }
        .ok_or_else(not_found)?;

        debug!("Loading {} of {} from {}", direction, migration.version(), part.path().display());
        part.read()
    }
}

#[derive(Debug, Default)]
struct Sections {
    marked: bool,
    up: String,
    down: Option<String>,
}

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Extract up and down SQL from a single migration file
fn parse_sections(content: &str) -> Sections {
    let mut sections = Sections::default();
    let mut up = Vec::new();
    let mut down = Vec::new();
    let mut current = Section::Preamble;

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(comment) = trimmed.strip_prefix("--") {
            let marker = comment.trim().to_lowercase();
            if marker == "up" || marker.starts_with("up migration") {
                current = Section::Up;
                sections.marked = true;
                continue;
            }
            if marker == "down" || marker.starts_with("down migration") {
                current = Section::Down;
                sections.marked = true;
                sections.down.get_or_insert_with(String::new);
                continue;
            }
        }

        match current {
            Section::Up => up.push(line),
            Section::Down => down.push(line),
            Section::Preamble => {}
        }
    }

    sections.up = up.join("\n").trim().to_string();
    if sections.down.is_some() {
        let sql = down.join("\n").trim().to_string();
        sections.down = if SqlScript::new(sql.as_str()).is_blank() {
            None
        } else {
            Some(sql)
        };
    }
    sections
}

/// Write an empty `do`/`undo` pair for a new migration and return their paths
pub fn create_migration(dir: &Path, name: &str) -> MigrateResult<(PathBuf, PathBuf)> {
    let slug = name
        .trim()
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if slug.is_empty() {
        return Err(MigrateError::Configuration(format!(
            "Invalid migration name: {:?}",
            name
        )));
    }

    fs::create_dir_all(dir)?;

    let now = Utc::now();
    let version = now.format("%Y%m%d%H%M%S").to_string();
    let do_path = dir.join(format!("{}_{}.do.sql", version, slug));
    let undo_path = dir.join(format!("{}_{}.undo.sql", version, slug));

    for path in [&do_path, &undo_path] {
        if path.exists() {
            return Err(MigrateError::Configuration(format!(
                "Migration file {} already exists",
                path.display()
            )));
        }
    }

    let header = format!(
        "-- Migration: {}\n-- Version: {}\n-- Created: {}\n\n",
        name.trim(),
        version,
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );
    fs::write(&do_path, format!("{}-- Add your schema changes here\n", header))?;
    fs::write(&undo_path, format!("{}-- Add rollback statements here\n", header))?;

    Ok((do_path, undo_path))
}
