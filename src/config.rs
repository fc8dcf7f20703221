//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Control plane configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Redis connection URL.
    pub redis_url: String,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Key prefix isolating this deployment's keys in the shared store.
    pub key_prefix: String,
    /// Lease TTL for per-task locks. Must exceed the longest critical
    /// section so a live holder is never expired mid-transition.
    pub lock_ttl: Duration,
    /// How long a caller waits for a contended lock before giving up.
    pub lock_acquire_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            bind_addr: "0.0.0.0:5000".to_string(),
            key_prefix: "dispatchd".to_string(),
            lock_ttl: Duration::from_secs(60),
            lock_acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl Settings {
    /// Build settings from `DISPATCHD_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            redis_url: std::env::var("DISPATCHD_REDIS_URL").unwrap_or(defaults.redis_url),
            bind_addr: std::env::var("DISPATCHD_BIND").unwrap_or(defaults.bind_addr),
            key_prefix: std::env::var("DISPATCHD_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            lock_ttl: duration_from_env("DISPATCHD_LOCK_TTL_SECS", defaults.lock_ttl)?,
            lock_acquire_timeout: duration_from_env(
                "DISPATCHD_LOCK_ACQUIRE_TIMEOUT_SECS",
                defaults.lock_acquire_timeout,
            )?,
        })
    }
}

fn duration_from_env(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a whole number of seconds, got {raw:?}"),
            })?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}
