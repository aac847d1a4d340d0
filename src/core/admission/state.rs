use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Lazily created per-key limiter state.
///
/// Each key's state is only touched while holding its `DashMap` shard lock,
/// which makes a check-and-update atomic for concurrent callers on the same
/// key without a global lock.
#[derive(Debug)]
pub(crate) struct KeyedStates<S> {
    states: DashMap<String, Slot<S>>,
}

#[derive(Debug)]
struct Slot<S> {
    state: S,
    last_seen: Instant,
}

impl<S> KeyedStates<S> {
    pub(crate) fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Runs `f` on the state for `key`, creating it with `init` first if
    /// needed.
    pub(crate) fn update<R>(
        &self,
        key: &str,
        now: Instant,
        init: impl FnOnce() -> S,
        f: impl FnOnce(&mut S) -> R,
    ) -> R {
        if let Some(mut slot) = self.states.get_mut(key) {
            slot.last_seen = now;
            return f(&mut slot.state);
        }

        let mut slot = self.states.entry(key.to_owned()).or_insert_with(|| Slot {
            state: init(),
            last_seen: now,
        });
        slot.last_seen = now;
        f(&mut slot.state)
    }

    /// Runs `f` on an existing state; `None` if the key is unknown.
    pub(crate) fn update_existing<R>(&self, key: &str, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        self.states.get_mut(key).map(|mut slot| f(&mut slot.state))
    }

    /// Removes states idle for at least `idle` for which `evictable` holds.
    pub(crate) fn evict_idle(&self, idle: Duration, evictable: impl Fn(&S) -> bool) -> usize {
        let now = Instant::now();
        let before = self.states.len();
        self.states.retain(|_, slot| {
            now.saturating_duration_since(slot.last_seen) < idle || !evictable(&slot.state)
        });
        before.saturating_sub(self.states.len())
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }
}
