mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use flowgate::{BoxError, CancelToken, FlowError, OverflowPolicy, Queue, WorkerExit, WorkerPool};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn each_item_is_handled_exactly_once() {
    common::init_logging();
    let q = Queue::bounded(16, OverflowPolicy::Wait).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let pool = WorkerPool::spawn(q.clone(), 4, move |item: u32| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().push(item);
            Ok::<_, BoxError>(())
        }
    })
    .unwrap();
    assert_eq!(pool.worker_count(), 4);

    for i in 0..1_000 {
        q.enqueue(i).await.unwrap();
    }
    q.close();

    let report = pool.join().await;
    assert_eq!(report.processed(), 1_000);
    assert_eq!(report.failed(), 0);
    assert!(report.all_drained());

    let seen = seen.lock();
    assert_eq!(seen.len(), 1_000);
    let unique: HashSet<u32> = seen.iter().copied().collect();
    assert_eq!(unique.len(), 1_000);
}

#[tokio::test]
async fn failing_and_panicking_items_do_not_stop_the_pool() {
    let q = Queue::unbounded();
    let pool = WorkerPool::spawn(q.clone(), 2, |item: u32| async move {
        match item % 10 {
            3 => Err::<(), BoxError>(format!("bad item {item}").into()),
            7 => panic!("item {item} exploded"),
            _ => Ok(()),
        }
    })
    .unwrap();
    let failures = pool.failures();

    for i in 0..100 {
        q.enqueue(i).await.unwrap();
    }
    q.close();

    let report = pool.join().await;
    assert_eq!(report.processed(), 80);
    assert_eq!(report.failed(), 20);
    assert!(report.all_drained());

    let reported: Vec<_> = failures.drain().collect();
    assert_eq!(reported.len(), 20);
    assert_eq!(reported.iter().filter(|f| f.error.is_panic()).count(), 10);
    assert!(reported
        .iter()
        .any(|f| f.error.to_string().contains("exploded")));
    assert!(flowgate::metrics::handler_failures() >= 20);
}

#[tokio::test]
async fn shutdown_stops_idle_workers_and_leaves_the_queue() {
    let q: Queue<u32> = Queue::unbounded();
    let pool = WorkerPool::spawn(q.clone(), 3, |_item: u32| async move {
        Ok::<_, BoxError>(())
    })
    .unwrap();

    assert_eq!(pool.queue().capacity(), q.capacity());
    let token = pool.cancel_token();
    assert!(!token.is_cancelled());

    tokio::time::sleep(Duration::from_millis(10)).await;
    let report = pool.shutdown().await;
    assert!(token.is_cancelled());

    assert_eq!(report.workers.len(), 3);
    assert!(report
        .workers
        .iter()
        .all(|w| w.exit == WorkerExit::Cancelled));
    assert!(!q.is_closed());
}

#[tokio::test]
async fn external_cancel_token_stops_the_pool() {
    let q: Queue<u32> = Queue::unbounded();
    let cancel = CancelToken::new();
    let pool = WorkerPool::spawn_with_cancel(
        q.clone(),
        2,
        |_item: u32| async move { Ok::<_, BoxError>(()) },
        cancel.clone(),
    )
    .unwrap();

    cancel.cancel();
    let report = pool.join().await;
    assert!(!report.all_drained());
    assert_eq!(report.processed(), 0);
}

#[tokio::test]
async fn zero_workers_is_rejected() {
    let q: Queue<u32> = Queue::unbounded();
    let result = WorkerPool::spawn(q, 0, |_item: u32| async move { Ok::<_, BoxError>(()) });
    assert!(matches!(result, Err(FlowError::InvalidConfig(_))));
}
