//! Retry policy for the persist loop.
//!
//! Two profiles exist: request scopes fail on the first compute error, while
//! background scopes tolerate a few transient failures before giving up.
//! The policy is a plain field on the store, read under the store lock at
//! claim time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable overriding [`RetryPolicy::max_attempt`].
pub const ENV_MAX_ATTEMPT: &str = "CTXCELL_MAX_ATTEMPT";

/// Environment variable overriding [`RetryPolicy::retry_delay`], in milliseconds.
pub const ENV_RETRY_DELAY_MS: &str = "CTXCELL_RETRY_DELAY_MS";

/// Bounded retry configuration for a compute function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total compute invocations allowed before the key is given up on.
    pub max_attempt: u32,
    /// Sleep between two consecutive failed attempts.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::request_scoped()
    }
}

impl RetryPolicy {
    /// Create a policy. Call [`validate`](Self::validate) before relying on it.
    pub fn new(max_attempt: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempt,
            retry_delay,
        }
    }

    /// No retry: one attempt, no delay.
    pub fn request_scoped() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Health-check profile for long-lived scopes: five attempts, two seconds apart.
    pub fn background() -> Self {
        Self::new(5, Duration::from_secs(2))
    }

    pub fn with_max_attempt(mut self, max_attempt: u32) -> Self {
        self.max_attempt = max_attempt;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Upper bound on time spent sleeping between attempts.
    pub fn total_delay(&self) -> Duration {
        self.retry_delay
            .saturating_mul(self.max_attempt.saturating_sub(1))
    }

    /// Validate the policy.
    ///
    /// Validates:
    /// - max_attempt >= 1
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempt == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempt".to_string(),
                value: self.max_attempt.to_string(),
                reason: "max_attempt must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Load the policy from environment variables over the request-scoped profile.
    ///
    /// Environment variables:
    /// - `CTXCELL_MAX_ATTEMPT`: total attempts (default: 1)
    /// - `CTXCELL_RETRY_DELAY_MS`: delay between attempts (default: 0)
    ///
    /// Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_env_with(Self::request_scoped())
    }

    /// Like [`from_env`](Self::from_env), overlaying the environment on `base`.
    pub fn from_env_with(base: Self) -> Self {
        match Self::try_from_env_with(base) {
            Ok(policy) => policy,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring retry policy environment");
                base
            }
        }
    }

    /// Strict variant of [`from_env`](Self::from_env).
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::try_from_env_with(Self::request_scoped())
    }

    /// Strict variant of [`from_env_with`](Self::from_env_with).
    pub fn try_from_env_with(base: Self) -> Result<Self, ConfigError> {
        Self::from_lookup(base, |name| std::env::var(name).ok())
    }

    fn from_lookup<F>(base: Self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut policy = base;

        if let Some(raw) = lookup(ENV_MAX_ATTEMPT) {
            policy.max_attempt = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: ENV_MAX_ATTEMPT.to_string(),
                value: raw.clone(),
                reason: "expected an unsigned integer".to_string(),
            })?;
        }

        if let Some(raw) = lookup(ENV_RETRY_DELAY_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: ENV_RETRY_DELAY_MS.to_string(),
                value: raw.clone(),
                reason: "expected milliseconds as an unsigned integer".to_string(),
            })?;
            policy.retry_delay = Duration::from_millis(ms);
        }

        policy.validate()?;
        Ok(policy)
    }
}
