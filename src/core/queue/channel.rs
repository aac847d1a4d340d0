use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::{Capacity, EnqueueOutcome, OverflowPolicy, TryEnqueueError};
use crate::core::cancel::CancelToken;
use crate::core::error::FlowError;
use crate::metrics;

/// Per-queue counters, read with [`Queue::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped_newest: u64,
    pub dropped_oldest: u64,
}

/// Cloneable handle to a shared FIFO.
///
/// All clones share one buffer guarded by a single mutex. Waiting producers
/// and consumers suspend on `Notify`s and never hold the lock across an
/// `.await`.
pub struct Queue<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    capacity: Capacity,
    policy: OverflowPolicy,
    state: Mutex<State<T>>,
    /// Signalled when an item is buffered or the queue closes.
    not_empty: Notify,
    /// Signalled when a slot frees up or the queue closes.
    not_full: Notify,
}

struct State<T> {
    buffer: VecDeque<T>,
    closed: bool,
    stats: QueueStats,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Queue")
            .field("capacity", &self.shared.capacity)
            .field("policy", &self.shared.policy)
            .field("len", &state.buffer.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> Queue<T> {
    /// Creates a queue. A bounded capacity of zero is rejected.
    pub fn new(capacity: Capacity, policy: OverflowPolicy) -> Result<Self, FlowError> {
        if capacity == Capacity::Bounded(0) {
            return Err(FlowError::InvalidConfig(
                "queue capacity must be at least 1".to_string(),
            ));
        }

        let buffer = match capacity {
            Capacity::Bounded(n) => VecDeque::with_capacity(n.min(1024)),
            Capacity::Unbounded => VecDeque::new(),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                capacity,
                policy,
                state: Mutex::new(State {
                    buffer,
                    closed: false,
                    stats: QueueStats::default(),
                }),
                not_empty: Notify::new(),
                not_full: Notify::new(),
            }),
        })
    }

    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Result<Self, FlowError> {
        Self::new(Capacity::Bounded(capacity), policy)
    }

    pub fn unbounded() -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: Capacity::Unbounded,
                policy: OverflowPolicy::Wait,
                state: Mutex::new(State {
                    buffer: VecDeque::new(),
                    closed: false,
                    stats: QueueStats::default(),
                }),
                not_empty: Notify::new(),
                not_full: Notify::new(),
            }),
        }
    }

    pub fn capacity(&self) -> Capacity {
        self.shared.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.shared.policy
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.state.lock().stats
    }

    /// Non-suspending enqueue.
    ///
    /// Returns `Full` where `enqueue` would have suspended, `Closed` after
    /// `close()`. Drop policies never report `Full`.
    pub fn try_enqueue(&self, item: T) -> Result<EnqueueOutcome, TryEnqueueError<T>> {
        let outcome = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(TryEnqueueError::Closed(item));
            }

            let full = matches!(self.shared.capacity, Capacity::Bounded(cap) if state.buffer.len() >= cap);
            if full {
                match self.shared.policy {
                    OverflowPolicy::Wait => return Err(TryEnqueueError::Full(item)),
                    OverflowPolicy::DropNewest => {
                        state.stats.dropped_newest += 1;
                        EnqueueOutcome::DroppedNewest
                    }
                    OverflowPolicy::DropOldest => {
                        state.buffer.pop_front();
                        state.buffer.push_back(item);
                        state.stats.dropped_oldest += 1;
                        state.stats.enqueued += 1;
                        EnqueueOutcome::DroppedOldest
                    }
                }
            } else {
                state.buffer.push_back(item);
                state.stats.enqueued += 1;
                EnqueueOutcome::Enqueued
            }
        };

        match outcome {
            EnqueueOutcome::Enqueued => metrics::inc_enqueued(1),
            EnqueueOutcome::DroppedOldest => {
                metrics::inc_enqueued(1);
                metrics::inc_dropped_oldest(1);
                trace!(target: "flowgate::queue", "evicted oldest item to make room");
            }
            EnqueueOutcome::DroppedNewest => {
                metrics::inc_dropped_newest(1);
                trace!(target: "flowgate::queue", "discarded incoming item, buffer full");
                return Ok(outcome);
            }
        }

        self.shared.not_empty.notify_waiters();
        Ok(outcome)
    }

    /// Enqueue, suspending only under `Wait` while the buffer is full.
    pub async fn enqueue(&self, item: T) -> Result<EnqueueOutcome, FlowError> {
        self.enqueue_inner(item, None).await
    }

    /// Like [`enqueue`](Self::enqueue); a cancelled wait returns
    /// `FlowError::Cancelled` and the item is dropped.
    pub async fn enqueue_with_cancel(
        &self,
        item: T,
        cancel: &CancelToken,
    ) -> Result<EnqueueOutcome, FlowError> {
        self.enqueue_inner(item, Some(cancel)).await
    }

    async fn enqueue_inner(
        &self,
        mut item: T,
        cancel: Option<&CancelToken>,
    ) -> Result<EnqueueOutcome, FlowError> {
        loop {
            // Register interest before checking state so a wakeup between the
            // check and the await is not lost.
            let notified = self.shared.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_enqueue(item) {
                Ok(outcome) => return Ok(outcome),
                Err(TryEnqueueError::Closed(_)) => return Err(FlowError::QueueClosed),
                Err(TryEnqueueError::Full(rejected)) => item = rejected,
            }

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = notified.as_mut() => {}
                        _ = token.cancelled() => return Err(FlowError::Cancelled),
                    }
                }
                None => notified.as_mut().await,
            }
        }
    }

    /// Non-suspending dequeue; `None` when the buffer is empty.
    pub fn try_dequeue(&self) -> Option<T> {
        let item = {
            let mut state = self.shared.state.lock();
            let item = state.buffer.pop_front()?;
            state.stats.dequeued += 1;
            item
        };
        self.after_dequeue(1);
        Some(item)
    }

    /// Pops up to `max` buffered items without suspending.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let drained: Vec<T> = {
            let mut state = self.shared.state.lock();
            let n = max.min(state.buffer.len());
            let drained: Vec<T> = state.buffer.drain(..n).collect();
            state.stats.dequeued += drained.len() as u64;
            drained
        };
        if !drained.is_empty() {
            self.after_dequeue(drained.len() as u64);
        }
        drained
    }

    /// Suspends until an item is available. `None` is end-of-stream: the
    /// queue is closed and fully drained.
    pub async fn dequeue(&self) -> Option<T> {
        match self.dequeue_inner(None).await {
            Ok(item) => item,
            // Only reachable with a cancel token.
            Err(_) => None,
        }
    }

    /// Like [`dequeue`](Self::dequeue), returning `FlowError::Cancelled` if
    /// the token fires first.
    pub async fn dequeue_with_cancel(&self, cancel: &CancelToken) -> Result<Option<T>, FlowError> {
        self.dequeue_inner(Some(cancel)).await
    }

    async fn dequeue_inner(&self, cancel: Option<&CancelToken>) -> Result<Option<T>, FlowError> {
        loop {
            let notified = self.shared.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                if let Some(item) = state.buffer.pop_front() {
                    state.stats.dequeued += 1;
                    drop(state);
                    self.after_dequeue(1);
                    return Ok(Some(item));
                }
                if state.closed {
                    return Ok(None);
                }
            }

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = notified.as_mut() => {}
                        _ = token.cancelled() => return Err(FlowError::Cancelled),
                    }
                }
                None => notified.as_mut().await,
            }
        }
    }

    fn after_dequeue(&self, n: u64) {
        metrics::inc_dequeued(n);
        if self.shared.policy == OverflowPolicy::Wait && self.shared.capacity != Capacity::Unbounded {
            self.shared.not_full.notify_waiters();
        }
    }

    /// Marks the queue as having no more producers. Idempotent.
    ///
    /// Suspended producers fail with `QueueClosed`; consumers drain what is
    /// buffered and then observe end-of-stream. Returns `true` only for the
    /// call that actually closed the queue.
    pub fn close(&self) -> bool {
        let remaining = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.buffer.len()
        };

        debug!(target: "flowgate::queue", remaining, "queue closed");
        self.shared.not_empty.notify_waiters();
        self.shared.not_full.notify_waiters();
        true
    }
}
