//! Configuration for model caching.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for the derived sweep interval.
const MAX_DERIVED_SWEEP_SECS: u64 = 10;

/// Configuration for the model cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Seconds of inactivity before a model is unloaded (default: 300).
    /// Zero disables eviction entirely.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Whether the background sweep runs. Defaults to `ttl_secs > 0`.
    #[serde(default)]
    pub revalidate: Option<bool>,

    /// Overrides the sweep interval derived from the TTL.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

fn default_ttl_secs() -> u64 {
    300 // 5 minutes
}

/// Errors that can occur during cache configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheConfigError {
    /// Invalid sweep interval (must be > 0 when set).
    #[error("Invalid sweep interval: must be greater than 0")]
    InvalidSweepInterval,

    /// Revalidation was requested without a TTL to revalidate against.
    #[error("Revalidation requires ttl_secs greater than 0")]
    RevalidateWithoutTtl,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: default_ttl_secs(), revalidate: None, sweep_interval_secs: None }
    }
}

impl CacheConfig {
    /// Configuration with the given TTL and default revalidation.
    #[must_use]
    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self { ttl_secs, ..Self::default() }
    }

    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.sweep_interval_secs == Some(0) {
            return Err(CacheConfigError::InvalidSweepInterval);
        }

        if self.ttl_secs == 0 && self.revalidate == Some(true) {
            return Err(CacheConfigError::RevalidateWithoutTtl);
        }

        Ok(())
    }

    /// Get the TTL as a Duration, or `None` when eviction is disabled.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }

    /// Whether the background sweep should run.
    #[must_use]
    pub fn revalidate(&self) -> bool {
        self.ttl_secs > 0 && self.revalidate.unwrap_or(true)
    }

    /// Interval between sweeps: half the TTL, clamped to 1..=10 seconds,
    /// unless overridden.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        let secs = self
            .sweep_interval_secs
            .unwrap_or_else(|| (self.ttl_secs / 2).clamp(1, MAX_DERIVED_SWEEP_SECS));
        Duration::from_secs(secs)
    }
}
