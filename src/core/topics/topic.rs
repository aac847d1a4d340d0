use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::handler::Handler;

/// Alias for a topic name.
pub type TopicName = String;

/// Unique (per bus) identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn from_raw(value: u64) -> Self {
        SubscriptionId(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub topic: TopicName,
    pub id: SubscriptionId,
}

pub(crate) struct Subscription<M> {
    pub(crate) id: SubscriptionId,
    pub(crate) handler: Arc<dyn Handler<Arc<M>>>,
}

impl<M> Clone for Subscription<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

/// A named channel owning its current subscriber set.
///
/// The set is copy-on-write: `subscribe`/`unsubscribe` build a new slice
/// under the write lock, `snapshot` clones the `Arc` under the read lock.
/// Publishers therefore never iterate a collection that is being mutated,
/// and no lock is held while handlers run.
pub(crate) struct Topic<M> {
    name: TopicName,
    subscribers: RwLock<Arc<[Subscription<M>]>>,
}

impl<M> fmt::Debug for Topic<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("subscribers", &self.len())
            .finish()
    }
}

impl<M> Topic<M> {
    pub(crate) fn new(name: impl Into<TopicName>) -> Self {
        Self {
            name: name.into(),
            subscribers: RwLock::new(Arc::from(Vec::new())),
        }
    }

    pub(crate) fn name(&self) -> &TopicName {
        &self.name
    }

    pub(crate) fn subscribe(&self, subscription: Subscription<M>) {
        let mut guard = self.subscribers.write();
        let mut next: Vec<Subscription<M>> = guard.iter().cloned().collect();
        next.push(subscription);
        *guard = Arc::from(next);
    }

    /// Returns `false` if no subscription with `id` exists.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.subscribers.write();
        if !guard.iter().any(|s| s.id == id) {
            return false;
        }
        let next: Vec<Subscription<M>> = guard.iter().filter(|s| s.id != id).cloned().collect();
        *guard = Arc::from(next);
        true
    }

    pub(crate) fn snapshot(&self) -> Arc<[Subscription<M>]> {
        Arc::clone(&self.subscribers.read())
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.read().len()
    }
}
