//! Fetch configuration.
//!
//! Stored as TOML; every field has a default so an empty file (or no file at
//! all) yields the conservative upstream throttle: 8 workers, 1 request per
//! second, 10 s per-call timeout, 3 attempts with 1 s / 2x backoff.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::data::rate_limit::MIN_RATE_PER_SEC;
use crate::domain::CLASSIFICATIONS;

pub const DEFAULT_BASE_URL: &str = "https://www.reinfolib.mlit.go.jp/ex-api/external/XIT001";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Knobs for the transport, limiter, retry policy and worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub base_url: String,
    pub classification: String,
    pub concurrency: usize,
    pub requests_per_second: f64,
    pub burst: u32,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_jitter: f64,
    pub backoff_max_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            classification: "01".to_string(),
            concurrency: 8,
            requests_per_second: 1.0,
            burst: 1,
            timeout_secs: 10,
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_multiplier: 2.0,
            backoff_jitter: 0.25,
            backoff_max_ms: 30_000,
        }
    }
}

impl FetchConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        };
        if self.base_url.trim().is_empty() {
            return Err(invalid("base_url", "must not be empty"));
        }
        if !CLASSIFICATIONS.contains(&self.classification.as_str()) {
            return Err(invalid("classification", "must be 01 or 02"));
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be at least 1"));
        }
        let rate = self.requests_per_second;
        if !(rate.is_finite() && rate >= MIN_RATE_PER_SEC) {
            return Err(invalid(
                "requests_per_second",
                "must be a finite number of at least one request per hour",
            ));
        }
        if self.burst == 0 {
            return Err(invalid("burst", "must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(invalid("backoff_multiplier", "must be >= 1.0"));
        }
        if !(0.0..1.0).contains(&self.backoff_jitter) {
            return Err(invalid("backoff_jitter", "must be in [0, 1)"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = FetchConfig::from_toml("").unwrap();
        assert_eq!(config, FetchConfig::default());
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config = FetchConfig::from_toml(
            r#"
            concurrency = 2
            requests_per_second = 4.0
            classification = "02"
            "#,
        )
        .unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.requests_per_second, 4.0);
        assert_eq!(config.classification, "02");
        assert_eq!(config.backoff_base_ms, 1000);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = FetchConfig::from_toml("concurrency = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "concurrency",
                ..
            }
        ));
    }

    #[test]
    fn rejects_bad_jitter_and_rate() {
        assert!(FetchConfig::from_toml("backoff_jitter = 1.5").is_err());
        assert!(FetchConfig::from_toml("requests_per_second = 0.0").is_err());
        assert!(FetchConfig::from_toml("backoff_multiplier = 0.5").is_err());
    }

    #[test]
    fn rejects_rate_too_small_to_schedule() {
        assert!(FetchConfig::from_toml("requests_per_second = 1e-20").is_err());
        assert!(FetchConfig::from_toml("requests_per_second = 0.0001").is_err());
        assert!(FetchConfig::from_toml("requests_per_second = 0.001").is_ok());
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            FetchConfig::from_toml("concurrency = ["),
            Err(ConfigError::Parse(_))
        ));
    }
}
