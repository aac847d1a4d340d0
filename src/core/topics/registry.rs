use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::core::cancel::CancelToken;
use crate::core::error::{BoxError, FlowError, HandlerError};
use crate::core::handler::Handler;
use crate::core::topics::report::{DeliveryFailure, PublishReport};
use crate::core::topics::topic::{
    Subscription, SubscriptionHandle, SubscriptionId, Topic, TopicName,
};
use crate::metrics;

/// Topic-based publish/subscribe bus.
///
/// Cheap to clone; clones share topics and subscriptions, so handlers can
/// capture a clone and publish derived events (re-entrancy is safe because
/// no lock is held while handlers run).
pub struct EventBus<M> {
    inner: Arc<BusInner<M>>,
}

struct BusInner<M> {
    /// Sharded map of topic name → topic; reads on different shards never
    /// contend.
    topics: DashMap<TopicName, Arc<Topic<M>>>,
    next_subscription: AtomicU64,
}

type Delivery = (SubscriptionId, JoinHandle<Result<(), BoxError>>);

impl<M> Clone for EventBus<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> Default for EventBus<M>
where
    M: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for EventBus<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.inner.topics.len())
            .finish()
    }
}

impl<M> EventBus<M>
where
    M: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: DashMap::new(),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    fn create_or_get_topic(&self, name: &str) -> Arc<Topic<M>> {
        if let Some(existing) = self.inner.topics.get(name) {
            return Arc::clone(&*existing);
        }
        self.inner
            .topics
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(target: "flowgate::bus", topic = name, "creating topic");
                Arc::new(Topic::new(name))
            })
            .clone()
    }

    fn get_topic(&self, name: &str) -> Option<Arc<Topic<M>>> {
        self.inner.topics.get(name).map(|entry| Arc::clone(&*entry))
    }

    /// Registers `handler` for every future publish on `topic`. Safe to call
    /// while publishes are in flight; they keep their own snapshot.
    pub fn subscribe<H>(&self, topic: &str, handler: H) -> SubscriptionHandle
    where
        H: Handler<Arc<M>>,
    {
        let id = SubscriptionId::from_raw(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let topic_ref = self.create_or_get_topic(topic);
        topic_ref.subscribe(Subscription {
            id,
            handler: Arc::new(handler),
        });

        debug!(target: "flowgate::bus", topic, subscription = %id, "subscribed");
        SubscriptionHandle {
            topic: topic_ref.name().clone(),
            id,
        }
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self
            .get_topic(&handle.topic)
            .is_some_and(|topic| topic.unsubscribe(handle.id));
        if removed {
            debug!(target: "flowgate::bus", topic = %handle.topic, subscription = %handle.id, "unsubscribed");
        }
        removed
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.get_topic(topic).map_or(0, |t| t.len())
    }

    /// Lists all topic names currently registered.
    pub fn topics(&self) -> Vec<TopicName> {
        self.inner
            .topics
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Removes a topic and all of its subscriptions.
    pub fn remove_topic(&self, name: &str) -> bool {
        self.inner.topics.remove(name).is_some()
    }

    /// Delivers `message` to every current subscriber of `topic`
    /// concurrently and waits for all of them.
    ///
    /// Handler failures (errors or panics) are isolated: the remaining
    /// handlers still run, and every failure is listed in the report.
    pub async fn publish(&self, topic: &str, message: M) -> PublishReport {
        let deliveries = self.fan_out(topic, message);
        collect(topic, deliveries).await
    }

    /// Like [`publish`](Self::publish); if `cancel` fires before every
    /// handler finished, the outstanding handler tasks are aborted and
    /// `FlowError::Cancelled` is returned.
    pub async fn publish_with_cancel(
        &self,
        topic: &str,
        message: M,
        cancel: &CancelToken,
    ) -> Result<PublishReport, FlowError> {
        let deliveries = self.fan_out(topic, message);
        let aborts: Vec<AbortHandle> = deliveries.iter().map(|(_, h)| h.abort_handle()).collect();

        tokio::select! {
            report = collect(topic, deliveries) => Ok(report),
            _ = cancel.cancelled() => {
                for handle in aborts {
                    handle.abort();
                }
                warn!(target: "flowgate::bus", topic, "publish cancelled before all handlers finished");
                Err(FlowError::Cancelled)
            }
        }
    }

    fn fan_out(&self, topic: &str, message: M) -> Vec<Delivery> {
        metrics::inc_published(1);

        let Some(topic_ref) = self.get_topic(topic) else {
            debug!(target: "flowgate::bus", topic, "no subscribers; message dropped");
            return Vec::new();
        };

        let snapshot = topic_ref.snapshot();
        let message = Arc::new(message);

        snapshot
            .iter()
            .map(|subscription| {
                let handler = Arc::clone(&subscription.handler);
                let message = Arc::clone(&message);
                // Invoke inside the task so a panic in `handle` itself is
                // captured by the JoinHandle too.
                let task = tokio::spawn(async move { handler.handle(message).await });
                (subscription.id, task)
            })
            .collect()
    }
}

async fn collect(topic: &str, deliveries: Vec<Delivery>) -> PublishReport {
    let mut report = PublishReport::new(topic);

    for (subscription, handle) in deliveries {
        let error = match handle.await {
            Ok(Ok(())) => {
                report.delivered += 1;
                continue;
            }
            Ok(Err(e)) => HandlerError::from_boxed(e),
            Err(join_err) if join_err.is_panic() => HandlerError::from_panic(join_err.into_panic()),
            Err(_) => HandlerError::Failed("handler task was aborted".to_string()),
        };

        warn!(
            target: "flowgate::bus",
            topic,
            subscription = %subscription,
            error = %error,
            "subscriber failed"
        );
        report.failures.push(DeliveryFailure { subscription, error });
    }

    metrics::inc_deliveries(report.delivered as u64);
    metrics::inc_handler_failures(report.failures.len() as u64);
    report
}
