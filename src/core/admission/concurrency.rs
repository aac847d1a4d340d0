use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use super::state::KeyedStates;
use super::{AdmissionPolicy, Decision, LimiterScope, PolicyKind};

/// Key used for every caller when the scope is global.
const GLOBAL_KEY: &str = "*";

/// Bounds the number of in-flight units of work, per key or globally.
///
/// Every successful acquire must be paired with exactly one `release`,
/// including when the guarded work fails; [`Permit`](super::Permit) does
/// this on drop. `in_flight` never exceeds `max_concurrent`.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    max_concurrent: u32,
    scope: LimiterScope,
    in_flight: KeyedStates<u32>,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: u32, scope: LimiterScope) -> Self {
        Self {
            max_concurrent,
            scope,
            in_flight: KeyedStates::new(),
        }
    }

    pub fn scope(&self) -> LimiterScope {
        self.scope
    }

    fn slot<'a>(&self, key: &'a str) -> &'a str {
        match self.scope {
            LimiterScope::PerKey => key,
            LimiterScope::Global => GLOBAL_KEY,
        }
    }

    /// Current in-flight count for `key` (or the global count).
    pub fn in_flight(&self, key: &str) -> u32 {
        self.in_flight
            .update_existing(self.slot(key), |n| *n)
            .unwrap_or(0)
    }
}

impl AdmissionPolicy for ConcurrencyLimiter {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Concurrency
    }

    fn decide(&self, key: &str) -> Decision {
        let max = self.max_concurrent;
        self.in_flight
            .update(self.slot(key), Instant::now(), || 0, |n| {
                if *n < max {
                    *n += 1;
                    Decision::allow(u64::from(max - *n))
                } else {
                    Decision::deny(None)
                }
            })
    }

    fn release(&self, key: &str) {
        let slot = self.slot(key);
        let released = self
            .in_flight
            .update_existing(slot, |n| {
                if *n == 0 {
                    false
                } else {
                    *n -= 1;
                    true
                }
            })
            .unwrap_or(false);

        if !released {
            warn!(target: "flowgate::admission", key = slot, "release without a matching acquire");
        }
    }

    fn evict_idle(&self, idle: Duration) -> usize {
        // Keys with work still in flight must keep their count.
        self.in_flight.evict_idle(idle, |n| *n == 0)
    }

    fn tracked_keys(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_scope_shares_one_counter() {
        let limiter = ConcurrencyLimiter::new(2, LimiterScope::Global);
        assert!(limiter.try_acquire("a"));
        assert!(limiter.try_acquire("b"));
        assert!(!limiter.try_acquire("c"));

        limiter.release("a");
        assert_eq!(limiter.in_flight("anyone"), 1);
        assert!(limiter.try_acquire("c"));
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn unmatched_release_saturates_at_zero() {
        let limiter = ConcurrencyLimiter::new(1, LimiterScope::PerKey);
        limiter.release("ghost");
        assert!(limiter.try_acquire("k"));
        limiter.release("k");
        limiter.release("k");
        assert_eq!(limiter.in_flight("k"), 0);
        assert!(limiter.try_acquire("k"));
    }

    #[test]
    fn busy_keys_survive_eviction() {
        let limiter = ConcurrencyLimiter::new(4, LimiterScope::PerKey);
        assert!(limiter.try_acquire("busy"));
        assert!(limiter.try_acquire("idle"));
        limiter.release("idle");

        assert_eq!(limiter.evict_idle(Duration::ZERO), 1);
        assert_eq!(limiter.in_flight("busy"), 1);
    }
}
