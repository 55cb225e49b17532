//! Retry with exponential backoff and jitter for collaborator calls

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::error::{CollaboratorError, ConfigError};

/// Retry settings as they appear in configuration files.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total calls per unit, including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Relative jitter applied to each delay (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: 0.2,
        }
    }
}

/// Why a unit stopped being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUp {
    /// Error class is permanent
    NonRetryable,
    /// `max_attempts` calls made
    Exhausted,
}

/// Next step after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { next_attempt: u32, delay: Duration },
    GiveUp(GiveUp),
}

/// Final result of running one unit under a [`RetryPolicy`].
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, CollaboratorError>,
    /// Number of calls made (>= 1)
    pub attempts: u32,
}

/// Bounded exponential backoff: `base * 2^(attempt-1)`, capped, ± jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter. Use [`RetryPolicy::with_jitter`] to add it.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::new("retry.max_attempts", "must be at least 1"));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(60).max(base_delay),
            jitter: 0.0,
        })
    }

    pub fn from_config(config: &RetryConfig) -> Result<Self, ConfigError> {
        let policy = Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))?
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
            .with_jitter(config.jitter)?;
        Ok(policy)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Result<Self, ConfigError> {
        if !(0.0..1.0).contains(&jitter) {
            return Err(ConfigError::new("retry.jitter", "must be in [0, 1)"));
        }
        self.jitter = jitter;
        Ok(self)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a failure on call number `attempt` (1-based) deserves another call.
    pub fn should_retry(&self, attempt: u32, error: &CollaboratorError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Un-jittered delay after call number `attempt`: 1s, 2s, 4s, ... with default settings.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Delay before the call following `attempt`, with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
        base.mul_f64(factor)
    }

    /// Decide what happens after call number `attempt` failed with `error`.
    ///
    /// A server-provided `retry_after` raises the delay but never past `max_delay`.
    pub fn decide(&self, attempt: u32, error: &CollaboratorError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp(GiveUp::NonRetryable);
        }
        if !self.should_retry(attempt, error) {
            return RetryDecision::GiveUp(GiveUp::Exhausted);
        }
        let mut delay = self.delay_for(attempt);
        if let Some(wait) = error.retry_after {
            delay = delay.max(wait.min(self.max_delay));
        }
        RetryDecision::Retry {
            next_attempt: attempt + 1,
            delay,
        }
    }

    /// Call `attempt_fn` until it succeeds or the policy gives up.
    ///
    /// `attempt_fn` receives the 1-based attempt number. Backoff sleeps the
    /// calling thread only.
    pub fn run<T>(
        &self,
        label: &str,
        mut attempt_fn: impl FnMut(u32) -> Result<T, CollaboratorError>,
    ) -> Attempted<T> {
        let mut attempt = 1u32;
        loop {
            match attempt_fn(attempt) {
                Ok(v) => {
                    return Attempted {
                        result: Ok(v),
                        attempts: attempt,
                    };
                }
                Err(e) => match self.decide(attempt, &e) {
                    RetryDecision::Retry {
                        next_attempt,
                        delay,
                    } => {
                        log::debug!(
                            "{label}: attempt {attempt}/{} failed: {e}, retrying in {:.1}s",
                            self.max_attempts,
                            delay.as_secs_f64()
                        );
                        std::thread::sleep(delay);
                        attempt = next_attempt;
                    }
                    RetryDecision::GiveUp(reason) => {
                        match reason {
                            GiveUp::NonRetryable => log::debug!("{label}: permanent failure: {e}"),
                            GiveUp::Exhausted => log::debug!(
                                "{label}: giving up after {attempt} attempts: {e}"
                            ),
                        }
                        return Attempted {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }
                },
            }
        }
    }
}
