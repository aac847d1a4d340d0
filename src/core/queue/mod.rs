//! Flowgate queue module.
//!
//! A typed FIFO between producers and consumers with an explicit completion
//! signal. Capacity is either bounded or unbounded; bounded queues apply an
//! [`OverflowPolicy`] when full:
//!
//! - `Wait`       – the producer suspends until a consumer frees a slot
//! - `DropNewest` – the incoming item is discarded, the call still succeeds
//! - `DropOldest` – the oldest buffered item is evicted to make room
//!
//! Drops never reorder: surviving items are always delivered in FIFO order.

mod channel;

pub use channel::{Queue, QueueStats};

use std::fmt;

use serde::Deserialize;

/// Buffer bound for a [`Queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Bounded(usize),
    Unbounded,
}

impl Capacity {
    /// `None` (or a missing config value) means unbounded.
    pub fn from_option(capacity: Option<usize>) -> Self {
        capacity.map_or(Capacity::Unbounded, Capacity::Bounded)
    }

    pub fn limit(self) -> Option<usize> {
        match self {
            Capacity::Bounded(n) => Some(n),
            Capacity::Unbounded => None,
        }
    }
}

/// What a bounded queue does with an enqueue when its buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Suspend the producer (backpressure).
    #[default]
    Wait,
    /// Discard the incoming item.
    DropNewest,
    /// Evict the oldest buffered item.
    DropOldest,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverflowPolicy::Wait => "wait",
            OverflowPolicy::DropNewest => "drop_newest",
            OverflowPolicy::DropOldest => "drop_oldest",
        })
    }
}

/// Result of an accepted enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The item was buffered.
    Enqueued,
    /// The buffer was full under `DropNewest`; the incoming item was discarded.
    DroppedNewest,
    /// The buffer was full under `DropOldest`; the item was buffered after
    /// evicting the oldest one.
    DroppedOldest,
}

/// Error from [`Queue::try_enqueue`]; hands the rejected item back.
pub enum TryEnqueueError<T> {
    /// `Wait` policy and the buffer is at capacity.
    Full(T),
    /// The queue has been closed.
    Closed(T),
}

impl<T> TryEnqueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TryEnqueueError::Full(item) | TryEnqueueError::Closed(item) => item,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, TryEnqueueError::Full(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, TryEnqueueError::Closed(_))
    }
}

impl<T> fmt::Debug for TryEnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryEnqueueError::Full(_) => f.write_str("Full(..)"),
            TryEnqueueError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for TryEnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryEnqueueError::Full(_) => write!(f, "queue is full"),
            TryEnqueueError::Closed(_) => write!(f, "queue is closed"),
        }
    }
}

impl<T> std::error::Error for TryEnqueueError<T> {}
