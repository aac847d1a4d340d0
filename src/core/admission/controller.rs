use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace};

use super::{
    AdmissionConfig, AdmissionPolicy, ConcurrencyLimiter, Decision, FixedWindow, PolicyKind,
    SlidingWindow, TokenBucket,
};
use crate::core::cancel::CancelToken;
use crate::core::error::FlowError;
use crate::metrics;

const MIN_EVICT_INTERVAL: Duration = Duration::from_millis(1);

/// Cloneable front for one admission policy.
///
/// Clones share state, so a controller can be handed to every worker.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    policy: Arc<dyn AdmissionPolicy>,
}

impl AdmissionController {
    /// Builds the policy selected by `config.policy` after validating the
    /// fields it reads.
    pub fn new(config: &AdmissionConfig) -> Result<Self, FlowError> {
        config.validate()?;

        let policy: Arc<dyn AdmissionPolicy> = match config.policy {
            PolicyKind::TokenBucket => Arc::new(TokenBucket::new(
                config.bucket_capacity,
                config.refill_rate_per_second,
            )),
            PolicyKind::FixedWindow => Arc::new(FixedWindow::new(config.limit, config.window())),
            PolicyKind::SlidingWindow => {
                Arc::new(SlidingWindow::new(config.limit, config.window()))
            }
            PolicyKind::Concurrency => {
                Arc::new(ConcurrencyLimiter::new(config.max_concurrent, config.scope))
            }
        };

        debug!(target: "flowgate::admission", policy = %config.policy, "admission controller created");
        Ok(Self { policy })
    }

    /// Wraps a custom policy.
    pub fn from_policy<P>(policy: P) -> Self
    where
        P: AdmissionPolicy + 'static,
    {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.policy.kind()
    }

    pub fn decide(&self, key: &str) -> Decision {
        let decision = self.policy.decide(key);
        if decision.allowed {
            metrics::inc_admitted(1);
        } else {
            metrics::inc_denied(1);
            trace!(target: "flowgate::admission", key, retry_after = ?decision.retry_after, "denied");
        }
        decision
    }

    pub fn try_acquire(&self, key: &str) -> bool {
        self.decide(key).allowed
    }

    /// Pairs a successful `try_acquire` under the concurrency policy; a
    /// no-op for rate policies.
    pub fn release(&self, key: &str) {
        self.policy.release(key);
    }

    /// Scoped acquire: the returned permit releases on drop, so the release
    /// also happens when the guarded work errors or panics.
    pub fn permit(&self, key: &str) -> Option<Permit> {
        self.acquire(key).ok()
    }

    /// Like [`permit`](Self::permit), but a denial comes back as the
    /// `Decision` so the caller can honour `retry_after`.
    pub fn acquire(&self, key: &str) -> Result<Permit, Decision> {
        let decision = self.decide(key);
        if !decision.allowed {
            return Err(decision);
        }
        Ok(Permit {
            controller: self.clone(),
            key: key.to_string(),
        })
    }

    pub fn evict_idle(&self, idle: Duration) -> usize {
        let evicted = self.policy.evict_idle(idle);
        if evicted > 0 {
            debug!(target: "flowgate::admission", evicted, "evicted idle limiter state");
        }
        evicted
    }

    pub fn tracked_keys(&self) -> usize {
        self.policy.tracked_keys()
    }

    /// Background sweep that evicts state idle for `idle` every `every`,
    /// until `cancel` fires. `every` is raised to at least one millisecond.
    pub fn spawn_evictor(&self, every: Duration, idle: Duration, cancel: CancelToken) -> JoinHandle<()> {
        let controller = self.clone();
        let every = every.max(MIN_EVICT_INTERVAL);
        tokio::spawn(async move {
            let mut interval = time::interval(every);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        controller.evict_idle(idle);
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            info!(target: "flowgate::admission", "idle evictor stopped");
        })
    }
}

/// Held while guarded work runs; releases its key on drop.
#[derive(Debug)]
pub struct Permit {
    controller: AdmissionController,
    key: String,
}

impl Permit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.controller.release(&self.key);
    }
}
