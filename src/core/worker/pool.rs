use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::cancel::CancelToken;
use crate::core::error::{FlowError, HandlerError};
use crate::core::handler::Handler;
use crate::core::queue::Queue;
use crate::metrics;

/// Failure reports buffered for `failures()` readers; further reports are
/// still logged and counted but not queued.
const FAILURE_CHANNEL_CAPACITY: usize = 1024;

/// Why a worker loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The queue was closed and drained.
    Drained,
    /// The pool's cancel token fired while the loop was waiting.
    Cancelled,
    /// The loop task itself was aborted or panicked outside a handler.
    Aborted,
}

/// One isolated handler failure.
#[derive(Debug, Clone)]
pub struct WorkerFailure {
    pub worker: usize,
    pub error: HandlerError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub worker: usize,
    pub processed: u64,
    pub failed: u64,
    pub exit: WorkerExit,
}

/// Outcome of a pool once every loop has stopped.
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub workers: Vec<WorkerSummary>,
}

impl PoolReport {
    /// Items whose handler returned `Ok`.
    pub fn processed(&self) -> u64 {
        self.workers.iter().map(|w| w.processed).sum()
    }

    pub fn failed(&self) -> u64 {
        self.workers.iter().map(|w| w.failed).sum()
    }

    pub fn all_drained(&self) -> bool {
        self.workers.iter().all(|w| w.exit == WorkerExit::Drained)
    }
}

/// A set of consumer loops draining one queue.
#[derive(Debug)]
pub struct WorkerPool<T> {
    queue: Queue<T>,
    cancel: CancelToken,
    handles: Vec<JoinHandle<WorkerSummary>>,
    failures: flume::Receiver<WorkerFailure>,
}

impl<T> WorkerPool<T>
where
    T: Send + 'static,
{
    /// Starts `worker_count` loops on the current tokio runtime.
    pub fn spawn<H>(queue: Queue<T>, worker_count: usize, handler: H) -> Result<Self, FlowError>
    where
        H: Handler<T>,
    {
        Self::spawn_with_cancel(queue, worker_count, handler, CancelToken::new())
    }

    /// Like [`spawn`](Self::spawn), stopping when the supplied token fires.
    pub fn spawn_with_cancel<H>(
        queue: Queue<T>,
        worker_count: usize,
        handler: H,
        cancel: CancelToken,
    ) -> Result<Self, FlowError>
    where
        H: Handler<T>,
    {
        if worker_count == 0 {
            return Err(FlowError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }

        let handler = Arc::new(handler);
        let (failure_tx, failure_rx) = flume::bounded(FAILURE_CHANNEL_CAPACITY);

        let handles = (0..worker_count)
            .map(|worker| {
                let lane = WorkerLane {
                    worker,
                    queue: queue.clone(),
                    handler: Arc::clone(&handler),
                    cancel: cancel.clone(),
                    failures: failure_tx.clone(),
                };
                tokio::spawn(lane.run())
            })
            .collect();

        info!(target: "flowgate::worker", worker_count, "worker pool started");

        Ok(Self {
            queue,
            cancel,
            handles,
            failures: failure_rx,
        })
    }

    pub fn queue(&self) -> &Queue<T> {
        &self.queue
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Side channel of handler failures.
    pub fn failures(&self) -> flume::Receiver<WorkerFailure> {
        self.failures.clone()
    }

    /// Waits for every loop to stop. Loops stop on their own once the queue
    /// is closed and drained, so close the queue (or cancel) first.
    pub async fn join(self) -> PoolReport {
        let mut workers = Vec::with_capacity(self.handles.len());
        for (worker, handle) in self.handles.into_iter().enumerate() {
            let summary = handle.await.unwrap_or_else(|e| {
                error!(target: "flowgate::worker", worker, error = %e, "worker task aborted");
                WorkerSummary {
                    worker,
                    processed: 0,
                    failed: 0,
                    exit: WorkerExit::Aborted,
                }
            });
            workers.push(summary);
        }

        let report = PoolReport { workers };
        info!(
            target: "flowgate::worker",
            processed = report.processed(),
            failed = report.failed(),
            "worker pool stopped"
        );
        report
    }

    /// Cancels every loop and waits for them. Items already being handled
    /// finish first; buffered items stay in the queue.
    pub async fn shutdown(self) -> PoolReport {
        self.cancel.cancel();
        self.join().await
    }
}

struct WorkerLane<T, H> {
    worker: usize,
    queue: Queue<T>,
    handler: Arc<H>,
    cancel: CancelToken,
    failures: flume::Sender<WorkerFailure>,
}

impl<T, H> WorkerLane<T, H>
where
    T: Send + 'static,
    H: Handler<T>,
{
    async fn run(self) -> WorkerSummary {
        let mut processed = 0u64;
        let mut failed = 0u64;

        let exit = loop {
            let item = match self.queue.dequeue_with_cancel(&self.cancel).await {
                Ok(Some(item)) => item,
                Ok(None) => break WorkerExit::Drained,
                Err(_) => break WorkerExit::Cancelled,
            };

            // The async block defers the call so a panic inside `handle`
            // itself is caught as well.
            let handler = Arc::clone(&self.handler);
            let outcome = AssertUnwindSafe(async move { handler.handle(item).await })
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(())) => {
                    processed += 1;
                    continue;
                }
                Ok(Err(e)) => HandlerError::from_boxed(e),
                Err(panic) => HandlerError::from_panic(panic),
            };

            failed += 1;
            self.report(error);
        };

        debug!(
            target: "flowgate::worker",
            worker = self.worker,
            processed,
            failed,
            ?exit,
            "worker loop finished"
        );

        WorkerSummary {
            worker: self.worker,
            processed,
            failed,
            exit,
        }
    }

    fn report(&self, error: HandlerError) {
        metrics::inc_handler_failures(1);
        warn!(
            target: "flowgate::worker",
            worker = self.worker,
            panicked = error.is_panic(),
            error = %error,
            "item handler failed"
        );
        let _ = self.failures.try_send(WorkerFailure {
            worker: self.worker,
            error,
        });
    }
}
