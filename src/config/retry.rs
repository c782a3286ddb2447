use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Exponential backoff governing session (re)connection attempts.
///
/// Attempt `n` (0-based) that fails is followed by a wait of
/// `base_delay_ms * backoff_multiplier^n`, capped at `max_delay_ms`.
/// One initial attempt plus at most `max_retries` retries are made.
/// Operation-level retries are not governed by this policy.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum number of retries after the initial attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Growth factor applied per attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for a single wait (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_retries: default_max_retries(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        initial_delay: Duration,
        max_retries: usize,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            base_delay_ms: initial_delay.as_millis() as u64,
            max_retries,
            backoff_multiplier,
            ..Default::default()
        }
    }

    /// Wait applied after failed attempt number `attempt` (0-based)
    pub fn delay_for(
        &self,
        attempt: usize,
    ) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exp);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    /// Total number of connection attempts allowed
    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.backoff_multiplier >= 1.0) {
            return Err(Error::Config(ConfigError::Message(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ))));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            ))));
        }
        Ok(())
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_retries() -> usize {
    3
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    30_000
}
