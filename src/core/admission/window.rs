use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::state::KeyedStates;
use super::{AdmissionPolicy, Decision, PolicyKind};

/// Fixed (tumbling) window counter per key.
///
/// Time is cut into consecutive windows of `window`, anchored at the key's
/// first request. Up to `limit` calls are allowed per window. A burst at
/// the end of one window followed by a burst at the start of the next can
/// admit up to `2 × limit` calls within one window length; that is inherent
/// to fixed windows. Use [`SlidingWindow`] where smoothing matters.
#[derive(Debug)]
pub struct FixedWindow {
    limit: u64,
    window: Duration,
    counters: KeyedStates<Counter>,
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    window_start: Instant,
    count: u64,
}

impl FixedWindow {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            counters: KeyedStates::new(),
        }
    }
}

impl Counter {
    /// Advances `window_start` to the start of the window containing `now`
    /// and resets the count if at least one window has elapsed.
    fn roll(&mut self, now: Instant, window: Duration) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < window {
            return;
        }
        let windows = elapsed.as_nanos() / window.as_nanos().max(1);
        let skip = window.as_nanos().saturating_mul(windows);
        self.window_start += Duration::from_nanos(u64::try_from(skip).unwrap_or(u64::MAX));
        self.count = 0;
    }
}

impl AdmissionPolicy for FixedWindow {
    fn kind(&self) -> PolicyKind {
        PolicyKind::FixedWindow
    }

    fn decide(&self, key: &str) -> Decision {
        let now = Instant::now();
        let (limit, window) = (self.limit, self.window);

        self.counters.update(
            key,
            now,
            || Counter {
                window_start: now,
                count: 0,
            },
            |counter| {
                counter.roll(now, window);
                if counter.count < limit {
                    counter.count += 1;
                    Decision::allow(limit - counter.count)
                } else {
                    let window_end = counter.window_start + window;
                    Decision::deny(Some(window_end.saturating_duration_since(now)))
                }
            },
        )
    }

    fn evict_idle(&self, idle: Duration) -> usize {
        self.counters.evict_idle(idle, |_| true)
    }

    fn tracked_keys(&self) -> usize {
        self.counters.len()
    }
}

/// Sliding-window log per key.
///
/// Keeps the timestamps of admitted calls from the last `window`; a call is
/// allowed iff fewer than `limit` remain after pruning. Memory grows with
/// the number of recent admissions (at most `limit` per key).
#[derive(Debug)]
pub struct SlidingWindow {
    limit: u64,
    window: Duration,
    logs: KeyedStates<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            logs: KeyedStates::new(),
        }
    }
}

fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = log.front() {
        if now.saturating_duration_since(oldest) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}

impl AdmissionPolicy for SlidingWindow {
    fn kind(&self) -> PolicyKind {
        PolicyKind::SlidingWindow
    }

    fn decide(&self, key: &str) -> Decision {
        let now = Instant::now();
        let (limit, window) = (self.limit, self.window);

        self.logs.update(key, now, VecDeque::new, |log| {
            prune(log, now, window);
            let count = log.len() as u64;
            if count < limit {
                log.push_back(now);
                Decision::allow(limit - count - 1)
            } else {
                let retry = log
                    .front()
                    .map(|&oldest| (oldest + window).saturating_duration_since(now));
                Decision::deny(retry)
            }
        })
    }

    fn evict_idle(&self, idle: Duration) -> usize {
        self.logs.evict_idle(idle, |_| true)
    }

    fn tracked_keys(&self) -> usize {
        self.logs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fixed_window_admits_a_burst_across_the_boundary() {
        let limiter = FixedWindow::new(3, Duration::from_secs(1));
        // The first request anchors the window at t=0.
        assert!(limiter.try_acquire("k"));

        tokio::time::advance(Duration::from_millis(950)).await;
        assert!(limiter.try_acquire("k"));
        assert!(limiter.try_acquire("k"));
        assert!(!limiter.try_acquire("k"));

        // t=1000: a fresh window. Five calls land within 50ms even though
        // the limit is three.
        tokio::time::advance(Duration::from_millis(50)).await;
        for _ in 0..3 {
            assert!(limiter.try_acquire("k"));
        }
        assert!(!limiter.try_acquire("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_window_stays_aligned_after_idle_gap() {
        let limiter = FixedWindow::new(1, Duration::from_secs(1));
        assert!(limiter.try_acquire("k"));

        // 2.5 windows later we are 0.5s into the third window.
        tokio::time::advance(Duration::from_millis(2500)).await;
        assert!(limiter.try_acquire("k"));
        let denied = limiter.decide("k");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_window_smooths_the_boundary() {
        let limiter = SlidingWindow::new(2, Duration::from_secs(1));
        assert!(limiter.try_acquire("k")); // t=0
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.try_acquire("k")); // t=600
        assert!(!limiter.try_acquire("k"));

        // t=1000: the t=0 entry expires, the t=600 one does not.
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(limiter.try_acquire("k"));
        let denied = limiter.decide("k");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_millis(600)));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let limiter = SlidingWindow::new(1, Duration::from_secs(10));
        assert!(limiter.try_acquire("alice"));
        assert!(!limiter.try_acquire("alice"));
        assert!(limiter.try_acquire("bob"));
        assert_eq!(limiter.tracked_keys(), 2);
    }
}
