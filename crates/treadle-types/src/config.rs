//! Engine configuration types.
//!
//! `EngineConfig` is loaded from `treadle.toml` by `treadle-infra`. Every
//! field has a default so an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration for the workflow engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub resource: ResourcePollConfig,
    #[serde(default)]
    pub retry: BackoffConfig,
    #[serde(default)]
    pub engine: SchedulerConfig,
    #[serde(default)]
    pub kubectl: KubectlConfig,
    /// Directory where inline manifests are written before invocation.
    /// Defaults to the system temp dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resource.validate()?;
        self.retry.validate()?;
        if self.engine.max_parallelism == Some(0) {
            return Err(ConfigError::Invalid(
                "engine.max_parallelism must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.manifest_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

// ---------------------------------------------------------------------------
// Resource polling
// ---------------------------------------------------------------------------

/// Poll cadence and overall deadline for resource nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for ResourcePollConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ResourcePollConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "resource.poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.poll_interval() > self.timeout() {
            return Err(ConfigError::Invalid(format!(
                "resource.poll_interval_ms ({}) exceeds resource.timeout_secs ({})",
                self.poll_interval_ms, self.timeout_secs
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Retry / backoff
// ---------------------------------------------------------------------------

/// Backoff schedule for transient errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Delay doubles after each attempt, capped at `max_backoff_ms`.
    #[default]
    Exponential,
    /// Every retry waits `initial_backoff_ms`.
    Fixed,
}

/// Retry budget for transient invoke and poll errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Maximum number of attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            strategy: BackoffStrategy::default(),
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be >= 1".to_string(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cap on concurrently running leaf nodes per run (None = unlimited).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallelism: Option<u32>,
}

// ---------------------------------------------------------------------------
// kubectl adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubectlConfig {
    #[serde(default = "default_kubectl_binary")]
    pub binary: String,
    /// Namespace used for `get` when the response carries none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

fn default_kubectl_binary() -> String {
    "kubectl".to_string()
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            binary: default_kubectl_binary(),
            namespace: None,
        }
    }
}
