use std::sync::atomic::{AtomicU64, Ordering};

// Global counters (low overhead). These are coarse-grained and process-wide;
// per-instance figures live on `QueueStats` / `PoolReport`.
static ENQUEUED: AtomicU64 = AtomicU64::new(0);
static DEQUEUED: AtomicU64 = AtomicU64::new(0);
static DROPPED_NEWEST: AtomicU64 = AtomicU64::new(0);
static DROPPED_OLDEST: AtomicU64 = AtomicU64::new(0);
static HANDLER_FAILURES: AtomicU64 = AtomicU64::new(0);
static PUBLISHED: AtomicU64 = AtomicU64::new(0);
static DELIVERIES: AtomicU64 = AtomicU64::new(0);
static ADMITTED: AtomicU64 = AtomicU64::new(0);
static DENIED: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn inc_enqueued(n: u64) {
    ENQUEUED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_dequeued(n: u64) {
    DEQUEUED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_dropped_newest(n: u64) {
    DROPPED_NEWEST.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_dropped_oldest(n: u64) {
    DROPPED_OLDEST.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_handler_failures(n: u64) {
    HANDLER_FAILURES.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_published(n: u64) {
    PUBLISHED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_deliveries(n: u64) {
    DELIVERIES.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_admitted(n: u64) {
    ADMITTED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_denied(n: u64) {
    DENIED.fetch_add(n, Ordering::Relaxed);
}

#[inline]
pub fn handler_failures() -> u64 {
    HANDLER_FAILURES.load(Ordering::Relaxed)
}

pub fn snapshot() -> String {
    // Simple text format (Prometheus-style without HELP/TYPE lines for brevity)
    format!(
        "flowgate_enqueued {}\nflowgate_dequeued {}\nflowgate_dropped_newest {}\nflowgate_dropped_oldest {}\nflowgate_handler_failures {}\nflowgate_published {}\nflowgate_deliveries {}\nflowgate_admitted {}\nflowgate_denied {}\n",
        ENQUEUED.load(Ordering::Relaxed),
        DEQUEUED.load(Ordering::Relaxed),
        DROPPED_NEWEST.load(Ordering::Relaxed),
        DROPPED_OLDEST.load(Ordering::Relaxed),
        HANDLER_FAILURES.load(Ordering::Relaxed),
        PUBLISHED.load(Ordering::Relaxed),
        DELIVERIES.load(Ordering::Relaxed),
        ADMITTED.load(Ordering::Relaxed),
        DENIED.load(Ordering::Relaxed),
    )
}
