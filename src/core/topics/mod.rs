//! Topic-based event bus.
//!
//! Each topic owns a copy-on-write set of subscriber handlers; publishing
//! snapshots the set and fans the message out to every handler concurrently,
//! then joins.

pub mod registry;
mod report;
pub mod topic;

pub use registry::EventBus;
pub use report::{DeliveryFailure, PublishReport};
pub use topic::{SubscriptionHandle, SubscriptionId, TopicName};
