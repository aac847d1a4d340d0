mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowgate::core::admission::{AdmissionPolicy, ConcurrencyLimiter, SlidingWindow, TokenBucket};
use flowgate::{
    AdmissionConfig, AdmissionController, CancelToken, Config, LimiterScope, PolicyKind,
};

#[tokio::test(start_paused = true)]
async fn token_bucket_allows_a_burst_then_refills() {
    common::init_logging();
    let controller = AdmissionController::new(&AdmissionConfig::token_bucket(5.0, 1.0)).unwrap();

    for _ in 0..5 {
        assert!(controller.try_acquire("client-a"));
    }
    let denied = controller.decide("client-a");
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.retry_after, Some(Duration::from_secs(1)));

    // Other keys have their own bucket.
    assert!(controller.try_acquire("client-b"));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(controller.try_acquire("client-a"));
    assert!(!controller.try_acquire("client-a"));
}

#[tokio::test(start_paused = true)]
async fn token_bucket_never_admits_more_than_capacity_plus_refill() {
    let bucket = TokenBucket::new(10.0, 5.0);
    let mut admitted = 0;
    // 2 seconds in 10ms steps, hammering 3 times per step.
    for _ in 0..200 {
        for _ in 0..3 {
            if bucket.try_acquire("k") {
                admitted += 1;
            }
        }
        tokio::time::advance(Duration::from_millis(10)).await;
    }
    // Burst of 10 plus at most 2s × 5/s of refill.
    assert!(admitted <= 20, "admitted {admitted}");
    assert!(admitted >= 17, "admitted {admitted}");
    assert!(bucket.available("k") <= 10.0);
}

#[tokio::test(start_paused = true)]
async fn fixed_window_resets_each_window() {
    let controller =
        AdmissionController::new(&AdmissionConfig::fixed_window(3, Duration::from_secs(1))).unwrap();
    assert_eq!(controller.kind(), PolicyKind::FixedWindow);

    for expected_remaining in [2, 1, 0] {
        let decision = controller.decide("k");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected_remaining);
    }
    assert!(!controller.try_acquire("k"));

    tokio::time::advance(Duration::from_secs(1)).await;
    for _ in 0..3 {
        assert!(controller.try_acquire("k"));
    }
    assert!(!controller.try_acquire("k"));
}

#[tokio::test(start_paused = true)]
async fn sliding_window_counts_the_trailing_window() {
    let limiter = SlidingWindow::new(3, Duration::from_secs(1));
    for _ in 0..3 {
        assert!(limiter.try_acquire("k"));
        tokio::time::advance(Duration::from_millis(300)).await;
    }
    // t=900: three calls in the last second.
    assert!(!limiter.try_acquire("k"));

    // t=1000: the call at t=0 has aged out.
    tokio::time::advance(Duration::from_millis(100)).await;
    assert!(limiter.try_acquire("k"));
    assert!(!limiter.try_acquire("k"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_limit_holds_under_parallel_load() {
    const MAX: u32 = 3;
    let controller =
        AdmissionController::new(&AdmissionConfig::concurrency(MAX, LimiterScope::Global)).unwrap();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..16)
        .map(|task| {
            let controller = controller.clone();
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                let key = format!("task-{task}");
                let mut done = 0;
                while done < 20 {
                    let Some(_permit) = controller.permit(&key) else {
                        tokio::task::yield_now().await;
                        continue;
                    };
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    done += 1;
                }
                completed.fetch_add(done, Ordering::SeqCst);
            })
        })
        .collect();

    for t in tasks {
        t.await.unwrap();
    }

    assert_eq!(completed.load(Ordering::SeqCst), 16 * 20);
    assert!(peak.load(Ordering::SeqCst) <= MAX as usize);

    // Every permit was returned: the full limit is available again.
    let held: Vec<_> = (0..MAX).filter_map(|_| controller.permit("x")).collect();
    assert_eq!(held.len(), MAX as usize);
    assert!(!controller.try_acquire("y"));
}

#[tokio::test]
async fn permit_is_released_when_guarded_work_panics() {
    let controller =
        AdmissionController::new(&AdmissionConfig::concurrency(1, LimiterScope::PerKey)).unwrap();

    let worker = controller.clone();
    let outcome = tokio::spawn(async move {
        let _permit = worker.permit("job").expect("first permit");
        panic!("work failed");
    })
    .await;
    assert!(outcome.unwrap_err().is_panic());

    let permit = controller.permit("job").expect("released on unwind");
    assert_eq!(permit.key(), "job");
    assert!(controller.permit("job").is_none());
    drop(permit);
    assert!(controller.try_acquire("job"));
}

#[test]
fn release_balances_per_key_counts() {
    let limiter = ConcurrencyLimiter::new(2, LimiterScope::PerKey);
    assert_eq!(limiter.scope(), LimiterScope::PerKey);
    assert!(limiter.try_acquire("a"));
    assert!(limiter.try_acquire("a"));
    assert!(!limiter.try_acquire("a"));
    assert!(limiter.try_acquire("b"));

    limiter.release("a");
    assert_eq!(limiter.in_flight("a"), 1);
    assert_eq!(limiter.in_flight("b"), 1);
}

#[test]
fn invalid_configs_are_rejected() {
    assert!(AdmissionController::new(&AdmissionConfig::token_bucket(0.5, 1.0)).is_err());
    assert!(AdmissionController::new(&AdmissionConfig::token_bucket(5.0, f64::NAN)).is_err());
    assert!(AdmissionController::new(&AdmissionConfig::fixed_window(0, Duration::from_secs(1))).is_err());
    assert!(AdmissionController::new(&AdmissionConfig::sliding_window(5, Duration::ZERO)).is_err());
    assert!(AdmissionController::new(&AdmissionConfig::concurrency(0, LimiterScope::Global)).is_err());
}

#[tokio::test(start_paused = true)]
async fn idle_state_is_evicted_in_the_background() {
    let controller =
        AdmissionController::new(&AdmissionConfig::sliding_window(10, Duration::from_secs(1))).unwrap();
    for key in ["a", "b", "c"] {
        assert!(controller.try_acquire(key));
    }
    assert_eq!(controller.tracked_keys(), 3);

    let cancel = CancelToken::new();
    let evictor = controller.spawn_evictor(
        Duration::from_millis(100),
        Duration::from_secs(1),
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(controller.try_acquire("c"));
    tokio::time::sleep(Duration::from_millis(700)).await;
    // "a" and "b" are 1.2s idle, "c" only 0.7s.
    assert_eq!(controller.tracked_keys(), 1);

    cancel.cancel();
    evictor.await.unwrap();
}

#[test]
fn custom_policies_plug_into_the_controller() {
    #[derive(Debug)]
    struct DenyAll;

    impl AdmissionPolicy for DenyAll {
        fn kind(&self) -> PolicyKind {
            PolicyKind::FixedWindow
        }
        fn decide(&self, _key: &str) -> flowgate::Decision {
            flowgate::Decision {
                allowed: false,
                remaining: 0,
                retry_after: None,
            }
        }
        fn evict_idle(&self, _idle: Duration) -> usize {
            0
        }
        fn tracked_keys(&self) -> usize {
            0
        }
    }

    let controller = AdmissionController::from_policy(DenyAll);
    assert!(!controller.try_acquire("anyone"));
    assert!(controller.permit("anyone").is_none());
}

#[tokio::test(start_paused = true)]
async fn validated_tiny_refill_rate_denies_without_panicking() {
    let cfg = Config::from_toml_str(
        "[admission]\npolicy = \"token_bucket\"\nbucket_capacity = 1.0\nrefill_rate_per_second = 1e-300\n",
    )
    .unwrap();
    let controller = AdmissionController::new(&cfg.admission).unwrap();

    assert!(controller.try_acquire("k"));
    let denied = controller.decide("k");
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, None);
}

#[tokio::test(start_paused = true)]
async fn zero_evict_interval_is_clamped() {
    let controller =
        AdmissionController::new(&AdmissionConfig::fixed_window(5, Duration::from_secs(1))).unwrap();
    assert!(controller.try_acquire("k"));

    let cancel = CancelToken::new();
    let evictor = controller.spawn_evictor(Duration::ZERO, Duration::from_millis(50), cancel.clone());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(controller.tracked_keys(), 0);

    cancel.cancel();
    evictor.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn acquire_hands_back_the_denial() {
    let controller =
        AdmissionController::new(&AdmissionConfig::fixed_window(1, Duration::from_secs(1))).unwrap();

    let permit = controller.acquire("k").expect("first call admitted");
    assert_eq!(permit.key(), "k");

    let denied = controller.acquire("k").unwrap_err();
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Some(Duration::from_secs(1)));
}
