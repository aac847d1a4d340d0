use std::any::Any;

use thiserror::Error;

/// Boxed error returned by user handlers (worker pool items, bus subscribers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by queues, pools and the event bus.
///
/// Admission denial has no variant here; a denied `try_acquire` is a plain
/// `false`.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Enqueue attempted after `close()`. A caller bug; never retried.
    #[error("queue is closed")]
    QueueClosed,
    /// A suspended operation observed its cancel token (or deadline).
    #[error("operation cancelled")]
    Cancelled,
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a single handler invocation, isolated from its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub(crate) fn from_boxed(err: BoxError) -> Self {
        HandlerError::Failed(err.to_string())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        HandlerError::Panicked(panic_message(payload.as_ref()))
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, HandlerError::Panicked(_))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
