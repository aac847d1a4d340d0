//! Flowgate – in-process async messaging primitives.
//!
//! This crate exports
//!  * `core`    – queue, worker pool, event bus and admission control
//!  * `config`  – TOML-driven configuration for the above
//!  * `logging` – `tracing` subscriber setup
//!  * `metrics` – process-wide counters
//!  * `util`    – caller-side helpers (retry backoff)
//!
//! A typical pipeline: producers enqueue into a [`Queue`], a [`WorkerPool`]
//! drains it, each item is gated by an [`AdmissionController`], and derived
//! events are published on an [`EventBus`] whose handlers may enqueue more
//! work.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod config;
pub mod core;
pub mod logging;
pub mod metrics;
pub mod util;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use config::{load_config, Config};
pub use crate::core::admission::{AdmissionConfig, AdmissionController, Decision, LimiterScope, PolicyKind};
pub use crate::core::cancel::CancelToken;
pub use crate::core::error::{BoxError, FlowError, HandlerError};
pub use crate::core::handler::Handler;
pub use crate::core::queue::{Capacity, EnqueueOutcome, OverflowPolicy, Queue, TryEnqueueError};
pub use crate::core::topics::{EventBus, PublishReport, SubscriptionHandle};
pub use crate::core::worker::{PoolReport, WorkerExit, WorkerPool};
