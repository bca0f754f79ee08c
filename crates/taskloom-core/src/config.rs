//! Config - TOML 設定ファイル
//!
//! ```toml
//! [scheduler]
//! tick_interval_ms = 1000
//! max_concurrent = 4
//! execution_timeout_secs = 300
//! cancel_on_shutdown = false
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 2000
//! multiplier = 2.0
//! max_delay_ms = 300000
//!
//! [storage]
//! path = "taskloom.db"
//! ```
//!
//! 省略されたキーはデフォルト値になる（serde default）。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::app::SchedulerSettings;
use crate::domain::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing TOML config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root of `taskloom.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskloomConfig {
    pub scheduler: SchedulerSection,
    pub retry: RetrySection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    pub tick_interval_ms: u64,
    pub max_concurrent: usize,
    pub execution_timeout_secs: Option<u64>,
    pub cancel_on_shutdown: bool,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            max_concurrent: 4,
            execution_timeout_secs: None,
            cancel_on_shutdown: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("taskloom.db"),
        }
    }
}

impl TaskloomConfig {
    /// Read and parse a TOML file, then validate it.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Like `load_from_path`, but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(path)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.scheduler.tick_interval_ms == 0 {
            return invalid("scheduler.tick_interval_ms must be greater than zero");
        }
        if self.scheduler.max_concurrent == 0 {
            return invalid("scheduler.max_concurrent must be at least 1");
        }
        if self.scheduler.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "scheduler.max_concurrent must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.scheduler.execution_timeout_secs == Some(0) {
            return invalid("scheduler.execution_timeout_secs must be greater than zero");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be a finite number >= 1.0");
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return invalid("retry.max_delay_ms must not be below retry.base_delay_ms");
        }
        Ok(())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            tick_interval: Duration::from_millis(self.scheduler.tick_interval_ms),
            max_concurrent: self.scheduler.max_concurrent,
            execution_timeout: self.scheduler.execution_timeout_secs.map(Duration::from_secs),
            cancel_on_shutdown: self.scheduler.cancel_on_shutdown,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}
