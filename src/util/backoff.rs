//! Caller-side retry backoff.
//!
//! Admission decisions never block, so a caller that was denied decides for
//! itself how long to wait. [`Backoff`] doubles its delay on every step up to
//! a ceiling, and prefers the limiter's `retry_after` hint when it has one.

use std::time::Duration;

use tokio::time::sleep;

/// Exponential backoff that starts with a few scheduler yields before it
/// begins sleeping.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    yields: u32,
    step: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1), Duration::from_millis(250))
    }
}

impl Backoff {
    /// Yields taken before the first sleep.
    const YIELD_BUDGET: u32 = 3;

    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            yields: 0,
            step: 0,
        }
    }

    /// Delay for the next sleeping step, without taking it.
    pub fn next_delay(&self) -> Duration {
        let factor = 1u32.checked_shl(self.step.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Number of sleeping steps taken since the last reset.
    pub fn attempts(&self) -> u32 {
        self.step
    }

    /// Waits before the next retry.
    ///
    /// The first few calls only yield to the runtime. After that the delay
    /// is the larger of `hint` and the exponential step, capped at `max`.
    pub async fn wait(&mut self, hint: Option<Duration>) {
        if self.yields < Self::YIELD_BUDGET {
            self.yields += 1;
            tokio::task::yield_now().await;
            return;
        }

        let delay = match hint {
            Some(hint) => hint.max(self.next_delay()).min(self.max),
            None => self.next_delay(),
        };
        self.step = self.step.saturating_add(1);
        sleep(delay).await;
    }

    pub fn reset(&mut self) {
        self.yields = 0;
        self.step = 0;
    }
}
