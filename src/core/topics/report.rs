use crate::core::error::HandlerError;
use crate::core::topics::topic::{SubscriptionId, TopicName};

/// One subscriber whose handler failed during a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub subscription: SubscriptionId,
    pub error: HandlerError,
}

/// Aggregate outcome of a fan-out-and-join publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub topic: TopicName,
    /// Handlers that completed successfully.
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl PublishReport {
    pub(crate) fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            delivered: 0,
            failures: Vec::new(),
        }
    }

    /// Handlers invoked (successful + failed).
    pub fn attempted(&self) -> usize {
        self.delivered + self.failures.len()
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}
