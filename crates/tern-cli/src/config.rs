//! CLI settings: YAML file, then environment, then flags

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tern_core::{LockPolicy, MigrateConfig};
use tern_sql::DEFAULT_TABLE;

/// Default configuration file, read only when present
pub const DEFAULT_CONFIG_FILE: &str = "tern.yaml";

/// Default migrations directory
pub const DEFAULT_DIR: &str = "migrations";

/// Contents of a `tern.yaml` file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub database_url: Option<String>,
    pub dir: Option<PathBuf>,
    pub table: Option<String>,
    pub lock_policy: Option<LockPolicy>,
    pub lock_timeout_secs: Option<u64>,
    pub allow_missing: Option<bool>,
}

impl FileConfig {
    /// Load the file at `path`. A missing default file yields an empty config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if explicit {
                bail!("Configuration file {} not found", path.display());
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub dir: Option<PathBuf>,
    pub table: Option<String>,
    pub fail_fast: bool,
    pub lock_timeout_secs: Option<u64>,
    pub allow_missing: bool,
}

/// Fully resolved settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub dir: PathBuf,
    pub table: String,
    pub migrate: MigrateConfig,
}

impl Settings {
    /// Merge file, environment and flags, later sources winning
    pub fn resolve<F>(file: FileConfig, env: F, overrides: Overrides) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut migrate = MigrateConfig::default();
        if let Some(policy) = file.lock_policy {
            migrate.set_lock_policy(policy);
        }
        if let Some(secs) = file.lock_timeout_secs {
            migrate.set_lock_timeout(Duration::from_secs(secs));
        }
        if let Some(allow) = file.allow_missing {
            migrate.set_allow_missing(allow);
        }

        if overrides.fail_fast {
            migrate.set_lock_policy(LockPolicy::FailFast);
        }
        if let Some(secs) = overrides.lock_timeout_secs {
            migrate.set_lock_timeout(Duration::from_secs(secs));
        }
        if overrides.allow_missing {
            migrate.set_allow_missing(true);
        }

        Settings {
            database_url: overrides
                .database_url
                .or_else(|| env("DATABASE_URL"))
                .or(file.database_url),
            dir: overrides
                .dir
                .or_else(|| env("TERN_DIR").map(PathBuf::from))
                .or(file.dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DIR)),
            table: overrides
                .table
                .or_else(|| env("TERN_TABLE"))
                .or(file.table)
                .unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            migrate,
        }
    }

    /// Database URL, required by every command touching the database
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().context(
            "No database URL configured; pass --database-url, set DATABASE_URL or add database_url to tern.yaml",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(FileConfig::default(), env_of(&[]), Overrides::default());
        assert!(settings.database_url.is_none());
        assert_eq!(settings.dir, PathBuf::from("migrations"));
        assert_eq!(settings.table, "_tern_migrations");
        assert_eq!(*settings.migrate.get_lock_policy(), LockPolicy::Block);
        assert!(settings.require_database_url().is_err());
    }

    #[test]
    fn test_file_values() {
        let file = FileConfig::parse(
            "database_url: postgres://file/db\n\
             dir: db/migrations\n\
             lock_policy: fail_fast\n\
             lock_timeout_secs: 30\n\
             allow_missing: true\n",
        )
        .unwrap();
        let settings = Settings::resolve(file, env_of(&[]), Overrides::default());

        assert_eq!(settings.database_url.as_deref(), Some("postgres://file/db"));
        assert_eq!(settings.dir, PathBuf::from("db/migrations"));
        assert_eq!(*settings.migrate.get_lock_policy(), LockPolicy::FailFast);
        assert_eq!(*settings.migrate.get_lock_timeout(), Duration::from_secs(30));
        assert!(*settings.migrate.get_allow_missing());
    }

    #[test]
    fn test_precedence() {
        let file = FileConfig {
            database_url: Some("postgres://file/db".to_string()),
            table: Some("file_table".to_string()),
            ..FileConfig::default()
        };
        let env = env_of(&[
            ("DATABASE_URL", "postgres://env/db"),
            ("TERN_TABLE", "env_table"),
        ]);
        let overrides = Overrides {
            table: Some("flag_table".to_string()),
            fail_fast: true,
            ..Overrides::default()
        };

        let settings = Settings::resolve(file, env, overrides);
        assert_eq!(settings.database_url.as_deref(), Some("postgres://env/db"));
        assert_eq!(settings.table, "flag_table");
        assert_eq!(*settings.migrate.get_lock_policy(), LockPolicy::FailFast);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(FileConfig::parse("databse_url: typo\n").is_err());
        assert!(FileConfig::parse("").unwrap().dir.is_none());
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(FileConfig::load(Some(&missing)).is_err());

        let present = dir.path().join("tern.yaml");
        std::fs::write(&present, "table: custom\n").unwrap();
        let file = FileConfig::load(Some(&present)).unwrap();
        assert_eq!(file.table.as_deref(), Some("custom"));
    }
}
