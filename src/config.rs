//! Reconciler configuration.
//!
//! Defaults suit a lab subscription; every knob can be overridden through a
//! `HUBSPOKE_*` environment variable (`.env` is loaded by `main`).

use crate::executor::{LeaseMode, RetryPolicy};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Pause between status polls of a long-running provider operation.
pub const POLL_INTERVAL_MSEC: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    /// Operations allowed in flight at once within one plan.
    pub worker_limit: usize,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    /// Deadline for ordinary resources to reach a terminal state, covering
    /// every retry attempt and the backoff between them.
    pub standard_timeout: Duration,
    /// Deadline for gateway create/delete, retries included.
    pub gateway_timeout: Duration,
    pub drift_interval: Duration,
    pub lease_mode: LeaseMode,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            worker_limit: 4,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(POLL_INTERVAL_MSEC),
            standard_timeout: Duration::from_secs(10 * 60),
            gateway_timeout: Duration::from_secs(60 * 60),
            drift_interval: Duration::from_secs(15 * 60),
            lease_mode: LeaseMode::Reject,
        }
    }
}

impl ReconcilerConfig {
    /// Build a config from the process environment on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from any variable lookup; unset variables keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ReconcilerConfig::default();

        if let Some(v) = parse_var::<usize, _>(&lookup, "HUBSPOKE_WORKER_LIMIT")? {
            if v == 0 {
                return Err(ConfigError::Invalid {
                    var: "HUBSPOKE_WORKER_LIMIT",
                    value: v.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            config.worker_limit = v;
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "HUBSPOKE_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v.max(1);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "HUBSPOKE_BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "HUBSPOKE_MAX_DELAY_MS")? {
            config.retry.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "HUBSPOKE_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "HUBSPOKE_STANDARD_TIMEOUT_SECS")? {
            config.standard_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "HUBSPOKE_GATEWAY_TIMEOUT_SECS")? {
            config.gateway_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "HUBSPOKE_DRIFT_INTERVAL_SECS")? {
            config.drift_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<LeaseMode, _>(&lookup, "HUBSPOKE_LEASE_MODE")? {
            config.lease_mode = v;
        }

        log::debug!("Reconciler config: {config:?}");
        Ok(config)
    }

    /// Timeout for an operation on the given kind of resource.
    pub fn timeout_for(&self, kind: crate::models::ResourceKind) -> Duration {
        if kind.is_long_running() {
            self.gateway_timeout
        } else {
            self.standard_timeout
        }
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
