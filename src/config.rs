//! YAML configuration loading and validation

use crate::error::{PrunerError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Lock service settings for the leader-election lease.
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Connection string for the database holding the lock table
    pub db_url: String,
    /// Lease key, unique per deployment
    #[serde(default = "default_lock_key")]
    pub key: String,
    /// Seconds between acquisition attempts
    pub retry_interval_secs: u64,
    /// Lease time-to-live in seconds; renewal runs at half this
    pub ttl_secs: u64,
}

fn default_lock_key() -> String {
    "pruner".to_string()
}

/// Per-store pruning settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub db_url: String,
    /// Seconds between pruning runs for this store
    pub refresh_interval_secs: u64,
    /// Records older than this many days are deleted
    pub cutoff_days: i64,
}

/// Health endpoint settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HealthConfig {
    /// Listen port for /health and /ready; 0 disables the listener
    #[serde(default)]
    pub port: u16,
}

/// Top-level service configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub lock: LockConfig,
    pub instance_metrics_db: StoreConfig,
    pub app_metrics_db: StoreConfig,
    pub scaling_engine_db: StoreConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl Config {
    /// Load configuration from a YAML file and validate it.
    ///
    /// Open, parse, and validation failures are three distinct errors so an
    /// operator can tell a missing file from a malformed one from a bad value.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PrunerError::ConfigOpen(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field the service depends on, naming the offending field
    /// in the error. Runs before any connection attempt.
    pub fn validate(&self) -> Result<()> {
        if self.lock.db_url.is_empty() {
            return validation_err("lock.db_url must not be empty");
        }
        if self.lock.key.is_empty() {
            return validation_err("lock.key must not be empty");
        }
        if self.lock.retry_interval_secs == 0 {
            return validation_err("lock.retry_interval_secs must be positive");
        }
        if self.lock.ttl_secs == 0 {
            return validation_err("lock.ttl_secs must be positive");
        }
        if self.lock.ttl_secs <= self.lock.retry_interval_secs {
            return validation_err("lock.ttl_secs must be greater than lock.retry_interval_secs");
        }

        for (name, store) in [
            ("instance_metrics_db", &self.instance_metrics_db),
            ("app_metrics_db", &self.app_metrics_db),
            ("scaling_engine_db", &self.scaling_engine_db),
        ] {
            if store.db_url.is_empty() {
                return validation_err(&format!("{}.db_url must not be empty", name));
            }
            if store.refresh_interval_secs == 0 {
                return validation_err(&format!("{}.refresh_interval_secs must be positive", name));
            }
            if store.cutoff_days <= 0 {
                return validation_err(&format!("{}.cutoff_days must be positive", name));
            }
        }

        Ok(())
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_secs(self.lock.retry_interval_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock.ttl_secs)
    }
}

impl StoreConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

fn validation_err<T>(msg: &str) -> Result<T> {
    Err(PrunerError::ConfigValidate(msg.to_string()))
}
