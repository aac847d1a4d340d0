use std::time::Duration;

use tokio::time::Instant;

use super::state::KeyedStates;
use super::{AdmissionPolicy, Decision, PolicyKind};

/// Token bucket per key: bursts up to `capacity`, sustained
/// `refill_rate_per_second`.
///
/// Buckets start full. On each call tokens are refilled by
/// `elapsed * rate` (capped at capacity); a call is allowed iff at least one
/// whole token is available, which it then consumes. `tokens` never leaves
/// `[0, capacity]`.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate_per_second: f64,
    buckets: KeyedStates<Bucket>,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: f64, rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate_per_second: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_second,
            buckets: KeyedStates::new(),
        }
    }

    /// Tokens currently available for `key` (after refill), without
    /// consuming any. Unknown keys report a full bucket.
    pub fn available(&self, key: &str) -> f64 {
        let now = Instant::now();
        let (capacity, rate) = (self.capacity, self.refill_rate_per_second);
        self.buckets
            .update_existing(key, |bucket| {
                bucket.refill(now, capacity, rate);
                bucket.tokens
            })
            .unwrap_or(capacity)
    }
}

impl AdmissionPolicy for TokenBucket {
    fn kind(&self) -> PolicyKind {
        PolicyKind::TokenBucket
    }

    fn decide(&self, key: &str) -> Decision {
        let now = Instant::now();
        let (capacity, rate) = (self.capacity, self.refill_rate_per_second);

        self.buckets.update(
            key,
            now,
            || Bucket {
                tokens: capacity,
                last_refill: now,
            },
            |bucket| {
                bucket.refill(now, capacity, rate);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    Decision::allow(bucket.tokens.floor() as u64)
                } else if rate > 0.0 {
                    // No hint when the wait does not fit in a `Duration`.
                    let wait = (1.0 - bucket.tokens) / rate;
                    Decision::deny(Duration::try_from_secs_f64(wait).ok())
                } else {
                    Decision::deny(None)
                }
            },
        )
    }

    fn evict_idle(&self, idle: Duration) -> usize {
        self.buckets.evict_idle(idle, |_| true)
    }

    fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}
