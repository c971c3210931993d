//! Event Hub - topic-based pub/sub fan-out over WebSocket
//!
//! Each subscriber gets its own bounded `mpsc` queue and a non-blocking
//! `try_send`: a slow reader drops its own messages instead of stalling
//! every other subscriber or forcing the hub to buffer unboundedly. This is
//! deliberately NOT `tokio::sync::broadcast`, which evicts the oldest
//! message for every subscriber when any one of them lags. That is the
//! wrong failure mode for per-client backpressure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// One event published onto a topic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub topic: String,
    /// `None` for events not scoped to a single cluster.
    pub cluster_name: Option<String>,
    pub payload: serde_json::Value,
}

struct Subscriber {
    sender: mpsc::Sender<Event>,
    /// When set, only events whose `cluster_name` matches (or is `None`)
    /// are delivered to this subscriber.
    cluster_filter: Option<String>,
    dropped: Arc<AtomicU64>,
}

#[derive(Default)]
struct Topic {
    subscribers: HashMap<Uuid, Subscriber>,
}

pub struct EventHub {
    topics: RwLock<HashMap<String, Topic>>,
    queue_capacity: usize,
}

pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<Event>,
    pub dropped_counter: Arc<AtomicU64>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_QUEUE_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            queue_capacity,
        }
    }

    /// Subscribe to a topic, optionally scoped to events for one cluster.
    pub async fn subscribe(&self, topic: &str, cluster_filter: Option<String>) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        let dropped = Arc::new(AtomicU64::new(0));

        let mut topics = self.topics.write().await;
        let entry = topics.entry(topic.to_string()).or_default();
        entry.subscribers.insert(
            id,
            Subscriber {
                sender,
                cluster_filter,
                dropped: dropped.clone(),
            },
        );

        Subscription {
            id,
            receiver,
            dropped_counter: dropped,
        }
    }

    /// Idempotent: unsubscribing an id that is already gone is a no-op.
    /// The subscriber's own receiver drains whatever is already queued;
    /// this only stops new deliveries.
    pub async fn unsubscribe(&self, topic: &str, id: Uuid) {
        let mut topics = self.topics.write().await;
        if let Some(entry) = topics.get_mut(topic) {
            entry.subscribers.remove(&id);
            if entry.subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Publish to every subscriber of `topic` whose cluster filter matches.
    /// Full queues are dropped for, not blocked on.
    pub async fn publish(&self, event: Event) {
        let topics = self.topics.read().await;
        let Some(entry) = topics.get(&event.topic) else {
            return;
        };

        for subscriber in entry.subscribers.values() {
            if let Some(filter) = &subscriber.cluster_filter {
                if event.cluster_name.as_deref() != Some(filter.as_str()) {
                    continue;
                }
            }
            if subscriber.sender.try_send(event.clone()).is_err() {
                subscriber.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }

    /// Register a periodic generator that publishes onto `topic` every
    /// `interval`, running in its own cooperative task until the returned
    /// handle is cancelled. `produce` yields the next payload to publish;
    /// a producer never blocks on subscriber state.
    pub fn spawn_generator<F, Fut>(
        self: &Arc<Self>,
        topic: impl Into<String>,
        interval: Duration,
        produce: F,
    ) -> GeneratorHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = serde_json::Value> + Send + 'static,
    {
        let topic = topic.into();
        let hub = self.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let payload = produce().await;
                        hub.publish(Event {
                            topic: topic.clone(),
                            cluster_name: None,
                            payload,
                        })
                        .await;
                    }
                }
            }
        });

        GeneratorHandle { cancel }
    }
}

/// A running periodic generator. Dropping this does not stop the generator;
/// call `cancel()` explicitly, mirroring `Subscription::close` being the only
/// way to stop delivery.
pub struct GeneratorHandle {
    cancel: CancellationToken,
}

impl GeneratorHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
