//! Migration configuration types and builders

use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::time::Duration;

/// What a runner does when another runner already holds the target lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// Wait until the lock is free (automatic startup migrations)
    #[default]
    Block,
    /// Return `LockUnavailable` immediately (CI and manual invocation)
    FailFast,
}

/// Configuration for planning and running migrations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct MigrateConfig {
    /// Lock acquisition policy
    #[builder(default = "LockPolicy::Block", getter, setter)]
    lock_policy: LockPolicy,

    /// Upper bound on a blocking lock wait (zero waits forever)
    #[builder(default = "Duration::from_secs(0)", getter, setter)]
    lock_timeout: Duration,

    /// Plan even when the target records versions the source does not provide
    #[builder(default = "false", getter, setter)]
    allow_missing: bool,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            lock_policy: LockPolicy::Block,
            lock_timeout: Duration::from_secs(0),
            allow_missing: false,
        }
    }
}

impl MigrateConfigBuilder {
    /// Fail fast on contention so a stuck lock is noticed immediately
    pub fn development() -> Self {
        MigrateConfigBuilder::new()
            .lock_policy(LockPolicy::FailFast)
            .lock_timeout(Duration::from_secs(0))
            .allow_missing(false)
    }

    /// Block on contention, bounded so a crashed peer cannot hang startup forever
    pub fn production() -> Self {
        MigrateConfigBuilder::new()
            .lock_policy(LockPolicy::Block)
            .lock_timeout(Duration::from_secs(300))
            .allow_missing(false)
    }

    /// Short bounded waits for test suites
    pub fn testing() -> Self {
        MigrateConfigBuilder::new()
            .lock_policy(LockPolicy::Block)
            .lock_timeout(Duration::from_secs(5))
            .allow_missing(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MigrateConfig::default();
        assert_eq!(*config.get_lock_policy(), LockPolicy::Block);
        assert_eq!(*config.get_lock_timeout(), Duration::from_secs(0));
        assert!(!*config.get_allow_missing());
    }

    #[test]
    fn test_config_setters() {
        let mut config = MigrateConfig::default();
        config.set_lock_policy(LockPolicy::FailFast);
        config.set_lock_timeout(Duration::from_secs(10));
        config.set_allow_missing(true);

        assert_eq!(*config.get_lock_policy(), LockPolicy::FailFast);
        assert_eq!(*config.get_lock_timeout(), Duration::from_secs(10));
        assert!(*config.get_allow_missing());
    }

    #[test]
    fn test_config_builder() {
        let config = MigrateConfigBuilder::new()
            .lock_policy(LockPolicy::FailFast)
            .build()
            .expect("Failed to build config");

        assert_eq!(*config.get_lock_policy(), LockPolicy::FailFast);
        assert_eq!(*config.get_lock_timeout(), Duration::from_secs(0)); // Default
        assert!(!*config.get_allow_missing());
    }

    #[test]
    fn test_production_config() {
        let config = MigrateConfigBuilder::production()
            .build()
            .expect("Failed to build config");
        assert_eq!(*config.get_lock_policy(), LockPolicy::Block);
        assert_eq!(*config.get_lock_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_development_config() {
        let config = MigrateConfigBuilder::development()
            .build()
            .expect("Failed to build config");
        assert_eq!(*config.get_lock_policy(), LockPolicy::FailFast);
    }

    #[test]
    fn test_lock_policy_from_yaml_name() {
        let policy: LockPolicy = serde_json::from_str("\"fail_fast\"").unwrap();
        assert_eq!(policy, LockPolicy::FailFast);
    }
}
