//! Configuration types

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cache entry TTL (7 days).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 7 * 24 * 3600;

/// Default lock lease (10 minutes). Must cover a full AI invocation.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 600;

/// Default prompt template version.
pub const DEFAULT_PROMPT_TEMPLATE_VERSION: &str = "v1";

/// Default model identifier when a request does not name one.
pub const DEFAULT_MODEL_VERSION: &str = "analysis-standard-1";

/// Default interval between expired cache entry sweeps (1 hour).
pub const DEFAULT_CACHE_PURGE_INTERVAL_SECS: u64 = 3600;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a completed result stays in the cache absent new activity.
    pub cache_ttl: Duration,
    /// Lease time of the per-key computation lock.
    pub lock_ttl: Duration,
    /// Version of the prompt templates, part of every prompt signature.
    pub prompt_template_version: String,
    /// Model identifier used when the caller does not provide one.
    pub default_model_version: String,
    /// Proceed without a lease when the key-value store is unreachable.
    pub lock_fail_open: bool,
    /// Connection URL of the shared key-value store, if any.
    pub kv_url: Option<String>,
    /// How often the purge task removes expired cache entries.
    pub cache_purge_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            prompt_template_version: DEFAULT_PROMPT_TEMPLATE_VERSION.to_string(),
            default_model_version: DEFAULT_MODEL_VERSION.to_string(),
            lock_fail_open: true,
            kv_url: None,
            cache_purge_interval: Duration::from_secs(DEFAULT_CACHE_PURGE_INTERVAL_SECS),
        }
    }
}

impl EngineConfig {
    /// Create EngineConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `DOCKET_CACHE_TTL_SECS` (default: 604800)
    /// - `DOCKET_LOCK_TTL_SECS` (default: 600)
    /// - `DOCKET_PROMPT_TEMPLATE_VERSION` (default: "v1")
    /// - `DOCKET_DEFAULT_MODEL_VERSION` (default: "analysis-standard-1")
    /// - `DOCKET_LOCK_FAIL_OPEN` (default: true)
    /// - `DOCKET_KV_URL` (default: unset)
    /// - `DOCKET_CACHE_PURGE_INTERVAL_SECS` (default: 3600)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_ttl = env_secs("DOCKET_CACHE_TTL_SECS").unwrap_or(defaults.cache_ttl);
        let lock_ttl = env_secs("DOCKET_LOCK_TTL_SECS").unwrap_or(defaults.lock_ttl);
        let cache_purge_interval =
            env_secs("DOCKET_CACHE_PURGE_INTERVAL_SECS").unwrap_or(defaults.cache_purge_interval);

        let prompt_template_version = std::env::var("DOCKET_PROMPT_TEMPLATE_VERSION")
            .unwrap_or(defaults.prompt_template_version);
        let default_model_version = std::env::var("DOCKET_DEFAULT_MODEL_VERSION")
            .unwrap_or(defaults.default_model_version);

        let lock_fail_open = std::env::var("DOCKET_LOCK_FAIL_OPEN")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.lock_fail_open);

        let kv_url = std::env::var("DOCKET_KV_URL").ok().filter(|s| !s.is_empty());

        Self {
            cache_ttl,
            lock_ttl,
            prompt_template_version,
            default_model_version,
            lock_fail_open,
            kv_url,
            cache_purge_interval,
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl.is_zero() {
            return Err(invalid("cache_ttl", "0", "must be positive"));
        }
        if self.lock_ttl < Duration::from_secs(1) {
            return Err(invalid(
                "lock_ttl",
                &format!("{:?}", self.lock_ttl),
                "must be at least one second",
            ));
        }
        if self.prompt_template_version.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "prompt_template_version".to_string(),
            });
        }
        if self.default_model_version.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "default_model_version".to_string(),
            });
        }
        if self.cache_purge_interval.is_zero() {
            return Err(invalid("cache_purge_interval", "0", "must be positive"));
        }
        Ok(())
    }

    /// Set the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the lock lease time.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Set the prompt template version.
    pub fn with_prompt_template_version(mut self, version: impl Into<String>) -> Self {
        self.prompt_template_version = version.into();
        self
    }

    /// Choose whether lock-store outages fail open.
    pub fn with_lock_fail_open(mut self, fail_open: bool) -> Self {
        self.lock_fail_open = fail_open;
        self
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
