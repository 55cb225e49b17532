//! Rate limiting keyed by collaborator.
//!
//! Each key gets its own governor limiter, so waiting on one collaborator
//! never holds up callers of another.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota};
use serde::Deserialize;

use crate::error::ConfigError;

/// Bucket settings for one collaborator key.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Burst size; the bucket starts full
    pub capacity: u32,
    /// Tokens added per second
    pub refill_per_sec: f64,
}

impl RateLimitConfig {
    /// One request every `interval` with no burst, e.g. arXiv's 3s rule.
    pub fn every(interval: Duration) -> Self {
        Self {
            capacity: 1,
            refill_per_sec: 1.0 / interval.as_secs_f64(),
        }
    }

    pub fn validate(&self, key: &str) -> Result<(), ConfigError> {
        self.quota(key).map(|_| ())
    }

    /// One token every `1 / refill_per_sec`, bursting up to `capacity`.
    fn quota(&self, key: &str) -> Result<Quota, ConfigError> {
        let burst = NonZeroU32::new(self.capacity).ok_or_else(|| {
            ConfigError::new(format!("rate_limits.{key}.capacity"), "must be at least 1")
        })?;
        let refill_error = || {
            ConfigError::new(
                format!("rate_limits.{key}.refill_per_sec"),
                "must be a positive number",
            )
        };
        if !(self.refill_per_sec.is_finite() && self.refill_per_sec > 0.0) {
            return Err(refill_error());
        }
        let period = Duration::try_from_secs_f64(1.0 / self.refill_per_sec)
            .map_err(|_| refill_error())?;
        Quota::with_period(period)
            .map(|q| q.allow_burst(burst))
            .ok_or_else(refill_error)
    }
}

/// Set of limiters, one per collaborator key.
///
/// Keys without a configured limiter are not limited.
#[derive(Default)]
pub struct RateLimiter {
    limiters: HashMap<String, DefaultDirectRateLimiter>,
    /// Reads the time `NotUntil` wait hints are measured from
    clock: DefaultClock,
}

impl RateLimiter {
    pub fn new(configs: &BTreeMap<String, RateLimitConfig>) -> Result<Self, ConfigError> {
        let mut limiters = HashMap::with_capacity(configs.len());
        for (key, config) in configs {
            let quota = config.quota(key)?;
            limiters.insert(key.clone(), governor::RateLimiter::direct(quota));
        }
        Ok(Self {
            limiters,
            clock: DefaultClock::default(),
        })
    }

    /// Limiter that never waits.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_limited(&self, key: &str) -> bool {
        self.limiters.contains_key(key)
    }

    /// Block until `key` has a token, then consume it. Returns the time
    /// spent waiting.
    pub fn acquire(&self, key: &str) -> Duration {
        let Some(limiter) = self.limiters.get(key) else {
            return Duration::ZERO;
        };
        let start = Instant::now();
        while let Err(not_until) = limiter.check() {
            std::thread::sleep(not_until.wait_time_from(self.clock.now()));
        }
        let waited = start.elapsed();
        if waited >= Duration::from_millis(500) {
            log::debug!("{key}: waited {:.1}s for rate limit", waited.as_secs_f64());
        }
        waited
    }

    /// Take a token without waiting, or report how long until one is free.
    pub fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        match self.limiters.get(key) {
            Some(limiter) => limiter
                .check()
                .map_err(|not_until| not_until.wait_time_from(self.clock.now())),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.limiters.keys().collect();
        keys.sort();
        f.debug_struct("RateLimiter").field("keys", &keys).finish()
    }
}
