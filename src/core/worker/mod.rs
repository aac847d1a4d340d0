//! Competing-consumer worker pool.
//!
//! N loops drain one [`Queue`](crate::core::queue::Queue); every item goes to
//! exactly one loop. A failing item (error or panic) is reported on a side
//! channel and never stops its loop.

mod pool;

pub use pool::{PoolReport, WorkerExit, WorkerFailure, WorkerPool, WorkerSummary};
