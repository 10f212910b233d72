//! Serializable collector configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use klinevault_core::MergePolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetcher::{CancelToken, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://data.binance.vision/data";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Collector settings, loadable from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Root of the archive host, without trailing path segments for market.
    pub base_url: String,

    /// Local root for `raw/` archives and `processed/` output.
    pub cache_dir: PathBuf,

    /// Maximum archives fetched in parallel.
    pub concurrency: usize,

    /// Retries after the first attempt.
    pub retries: u32,

    /// Per-attempt request timeout.
    pub timeout_secs: u64,

    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,

    /// Fetch `.CHECKSUM` companions and reject archives that do not match.
    pub verify_checksums: bool,

    pub merge_policy: MergePolicy,

    pub breaker_cooldown_secs: u64,
    pub breaker_failure_threshold: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_dir: PathBuf::from("data"),
            concurrency: 4,
            retries: 3,
            timeout_secs: 30,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            verify_checksums: true,
            merge_policy: MergePolicy::LaterWins,
            breaker_cooldown_secs: 30 * 60,
            breaker_failure_threshold: 3,
        }
    }
}

impl CollectorConfig {
    /// Load and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings the fetcher cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url must not be empty".into()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be at least 1".into()));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid(
                "backoff_max_ms must not be below backoff_base_ms".into(),
            ));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker_failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    /// Retry and backoff settings for the fetcher.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            timeout: self.timeout(),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

/// Per-call options for [`crate::collect`].
#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub config: CollectorConfig,
    /// Ignore verified local copies and fetch everything again.
    pub force: bool,
    pub cancel: CancelToken,
}

impl CollectOptions {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            force: false,
            cancel: CancelToken::new(),
        }
    }

    /// Ignore cached archives and refetch everything.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Use a caller-owned token so the run can be cancelled from outside.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self::new(CollectorConfig::default())
    }
}
