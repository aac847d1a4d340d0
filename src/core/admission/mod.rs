//! Admission control: decide, before doing work, whether a caller may
//! proceed.
//!
//! Four interchangeable policies share the [`AdmissionPolicy`] contract:
//!
//! | policy              | state per key                     | release? |
//! |---------------------|-----------------------------------|----------|
//! | [`TokenBucket`]     | tokens + last refill instant      | no       |
//! | [`FixedWindow`]     | window start + count              | no       |
//! | [`SlidingWindow`]   | timestamp log pruned to window    | no       |
//! | [`ConcurrencyLimiter`] | in-flight count (or one global) | yes      |
//!
//! Per-key state lives in a sharded map, so callers with different keys
//! rarely contend. A denial is a plain `false`, never an error, and no
//! policy retries on the caller's behalf.

mod concurrency;
mod controller;
mod state;
mod token_bucket;
mod window;

pub use concurrency::ConcurrencyLimiter;
pub use controller::{AdmissionController, Permit};
pub use token_bucket::TokenBucket;
pub use window::{FixedWindow, SlidingWindow};

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::core::error::FlowError;

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Permits left for this key after the decision.
    pub remaining: u64,
    /// Earliest time a retry could succeed, when the policy can tell.
    pub retry_after: Option<Duration>,
}

impl Decision {
    pub(crate) fn allow(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
        }
    }

    pub(crate) fn deny(retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after,
        }
    }
}

/// Contract shared by every admission policy.
pub trait AdmissionPolicy: Send + Sync + fmt::Debug {
    fn kind(&self) -> PolicyKind;

    /// Checks and, when allowed, consumes one permit for `key`.
    fn decide(&self, key: &str) -> Decision;

    fn try_acquire(&self, key: &str) -> bool {
        self.decide(key).allowed
    }

    /// Returns a permit taken by a successful acquire. Only meaningful for
    /// the concurrency limiter; rate policies ignore it.
    fn release(&self, _key: &str) {}

    /// Drops state for keys untouched for at least `idle`. Returns the
    /// number of keys evicted.
    fn evict_idle(&self, idle: Duration) -> usize;

    fn tracked_keys(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    TokenBucket,
    FixedWindow,
    SlidingWindow,
    Concurrency,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PolicyKind::TokenBucket => "token_bucket",
            PolicyKind::FixedWindow => "fixed_window",
            PolicyKind::SlidingWindow => "sliding_window",
            PolicyKind::Concurrency => "concurrency",
        })
    }
}

/// Whether the concurrency limiter counts per key or across all callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterScope {
    #[default]
    PerKey,
    Global,
}

/// Settings for [`AdmissionController::new`]. Only the fields relevant to
/// `policy` are read.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub policy: PolicyKind,
    /// Requests per window (fixed / sliding window).
    pub limit: u64,
    pub window_ms: u64,
    /// Token bucket refill rate.
    pub refill_rate_per_second: f64,
    /// Token bucket burst size.
    pub bucket_capacity: f64,
    pub max_concurrent: u32,
    pub scope: LimiterScope,
    /// Evict per-key state idle for this long (background sweeper).
    pub idle_timeout_ms: Option<u64>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::TokenBucket,
            limit: 100,
            window_ms: 1_000,
            refill_rate_per_second: 10.0,
            bucket_capacity: 10.0,
            max_concurrent: 16,
            scope: LimiterScope::PerKey,
            idle_timeout_ms: None,
        }
    }
}

impl AdmissionConfig {
    pub fn token_bucket(bucket_capacity: f64, refill_rate_per_second: f64) -> Self {
        Self {
            policy: PolicyKind::TokenBucket,
            bucket_capacity,
            refill_rate_per_second,
            ..Self::default()
        }
    }

    pub fn fixed_window(limit: u64, window: Duration) -> Self {
        Self {
            policy: PolicyKind::FixedWindow,
            limit,
            window_ms: window.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn sliding_window(limit: u64, window: Duration) -> Self {
        Self {
            policy: PolicyKind::SlidingWindow,
            limit,
            window_ms: window.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn concurrency(max_concurrent: u32, scope: LimiterScope) -> Self {
        Self {
            policy: PolicyKind::Concurrency,
            max_concurrent,
            scope,
            ..Self::default()
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Checks the fields the selected policy reads.
    pub fn validate(&self) -> Result<(), FlowError> {
        let invalid = |msg: &str| Err(FlowError::InvalidConfig(msg.to_string()));
        match self.policy {
            PolicyKind::TokenBucket => {
                if self.bucket_capacity.is_nan() || self.bucket_capacity < 1.0 {
                    return invalid("bucket_capacity must be at least 1");
                }
                if !self.refill_rate_per_second.is_finite() || self.refill_rate_per_second < 0.0 {
                    return invalid("refill_rate_per_second must be a finite, non-negative number");
                }
            }
            PolicyKind::FixedWindow | PolicyKind::SlidingWindow => {
                if self.limit == 0 {
                    return invalid("limit must be at least 1");
                }
                if self.window_ms == 0 {
                    return invalid("window_ms must be at least 1");
                }
            }
            PolicyKind::Concurrency => {
                if self.max_concurrent == 0 {
                    return invalid("max_concurrent must be at least 1");
                }
            }
        }
        Ok(())
    }
}
