//! Topic-keyed publish/subscribe bus.
//!
//! [`MessageBus`] is the capability the verification services are handed at
//! construction time: `publish(topic, bytes)` and `subscribe(topic)`.
//! [`IpcBus`] is the in-process implementation, one
//! [`tokio::sync::broadcast`] channel per topic, created lazily on first
//! subscription.
//!
//! Messages are wrapped in [`Arc`] so fan-out to several subscribers does
//! not clone the payload.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use verigate_kernel::ipc::{IpcBus, MessageBus};
//! # async fn example() {
//! let bus = IpcBus::new(256);
//! let mut sub = bus.subscribe("verification.completed").unwrap();
//!
//! bus.publish("verification.completed", br#"{"verification_id":"x"}"#.to_vec())
//!     .await
//!     .unwrap();
//!
//! let message = sub.next().await.unwrap();
//! assert_eq!(message.topic, "verification.completed");
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::error::{BusError, BusResult};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single message delivered through the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Unique identifier assigned at publish time.
    pub id: Uuid,
    /// Topic the message was published to.
    pub topic: String,
    /// Opaque payload bytes; decoding is the subscriber's job.
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Publish/subscribe capability injected into services.
///
/// Implementations must be cheap to share behind an `Arc<dyn MessageBus>`.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` to `topic`.
    ///
    /// Returns the number of subscribers that will observe the message.
    /// Zero subscribers is not an error.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> BusResult<usize>;

    /// Subscribe to all messages published to `topic` from now on.
    fn subscribe(&self, topic: &str) -> BusResult<Subscription>;
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving half of a topic subscription.
pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<Arc<BusMessage>>,
}

impl Subscription {
    /// Wrap a raw broadcast receiver. Exposed so other [`MessageBus`]
    /// implementations can hand out the same subscription type.
    pub fn new(topic: impl Into<String>, receiver: broadcast::Receiver<Arc<BusMessage>>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    /// The topic this subscription listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message.
    ///
    /// A subscriber that falls behind the channel capacity skips the
    /// overwritten messages (logged at `warn`) and keeps going. Returns
    /// `None` once the bus is closed.
    pub async fn next(&mut self) -> Option<Arc<BusMessage>> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "subscriber lagged, messages dropped");
                }
                Err(RecvError::Closed) => {
                    tracing::debug!(topic = %self.topic, "subscription closed");
                    return None;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tuning knobs for [`IpcBus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-topic channel capacity. Slow subscribers lag beyond this.
    pub capacity: usize,
    /// Largest payload accepted by `publish`, in bytes.
    pub max_payload_bytes: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_payload_bytes: 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// IPC Bus
// ---------------------------------------------------------------------------

/// In-process [`MessageBus`] backed by one broadcast channel per topic.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct IpcBus {
    inner: Arc<IpcBusInner>,
}

struct IpcBusInner {
    topics: DashMap<String, broadcast::Sender<Arc<BusMessage>>>,
    config: BusConfig,
    closed: AtomicBool,
}

impl IpcBus {
    /// Create a bus with the given per-topic capacity and default limits.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_config(BusConfig {
            capacity,
            ..BusConfig::default()
        })
    }

    /// Create a bus from a full [`BusConfig`].
    #[must_use]
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(IpcBusInner {
                topics: DashMap::new(),
                config: BusConfig {
                    capacity: config.capacity.max(1),
                    ..config
                },
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Messages on `topic` not yet seen by its slowest subscriber.
    pub fn backlog(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(topic)
            .map(|sender| sender.len())
            .unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    /// Close the bus.
    ///
    /// Pending subscriptions drain and then yield `None`; further publishes
    /// and subscriptions fail with [`BusError::Closed`].
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.topics.clear();
            tracing::info!("message bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn check_topic(topic: &str) -> BusResult<()> {
        if topic.is_empty() || topic.chars().any(char::is_whitespace) {
            return Err(BusError::InvalidTopic {
                topic: topic.to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for IpcBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> BusResult<usize> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        Self::check_topic(topic)?;

        let limit = self.inner.config.max_payload_bytes;
        if payload.len() > limit {
            return Err(BusError::PayloadTooLarge {
                size: payload.len(),
                limit,
            });
        }

        let Some(sender) = self.inner.topics.get(topic).map(|s| s.clone()) else {
            tracing::trace!(topic, "message published but topic has no subscribers");
            return Ok(0);
        };

        let message = Arc::new(BusMessage {
            id: Uuid::now_v7(),
            topic: topic.to_owned(),
            payload,
            published_at: Utc::now(),
        });

        match sender.send(message) {
            Ok(n) => {
                tracing::trace!(topic, receivers = n, "message published");
                Ok(n)
            }
            Err(_) => {
                // Every receiver for this topic has been dropped.
                tracing::trace!(topic, "message published but no active receivers");
                Ok(0)
            }
        }
    }

    fn subscribe(&self, topic: &str) -> BusResult<Subscription> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        Self::check_topic(topic)?;

        let capacity = self.inner.config.capacity;
        let receiver = self
            .inner
            .topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe();

        tracing::debug!(topic, "new bus subscriber");
        Ok(Subscription::new(topic, receiver))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = IpcBus::new(16);
        let mut sub = bus.subscribe("verification.create").expect("subscribe");

        let receivers = bus
            .publish("verification.create", b"hello".to_vec())
            .await
            .expect("publish should succeed");
        assert_eq!(receivers, 1);

        let received = sub.next().await.expect("should receive message");
        assert_eq!(received.topic, "verification.create");
        assert_eq!(received.payload, b"hello");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = IpcBus::new(16);
        let mut created = bus.subscribe("verification.create").expect("subscribe");
        let _completed = bus.subscribe("verification.completed").expect("subscribe");

        bus.publish("verification.completed", b"done".to_vec())
            .await
            .expect("publish");
        bus.publish("verification.create", b"new".to_vec())
            .await
            .expect("publish");

        let first = created.next().await.expect("message");
        assert_eq!(first.payload, b"new");
    }

    #[tokio::test]
    async fn multiple_subscribers_share_message() {
        let bus = IpcBus::new(16);
        let mut rx1 = bus.subscribe("t").expect("rx1");
        let mut rx2 = bus.subscribe("t").expect("rx2");

        let n = bus.publish("t", b"fan-out".to_vec()).await.expect("publish");
        assert_eq!(n, 2);

        let m1 = rx1.next().await.expect("rx1");
        let m2 = rx2.next().await.expect("rx2");
        assert!(Arc::ptr_eq(&m1, &m2));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_ok() {
        let bus = IpcBus::new(16);
        let result = bus.publish("lonely", b"no one listening".to_vec()).await;
        assert_eq!(result.unwrap(), 0);
    }

    #[tokio::test]
    async fn subscriber_count_tracks_drops() {
        let bus = IpcBus::new(16);
        assert_eq!(bus.subscriber_count("t"), 0);

        let rx1 = bus.subscribe("t").unwrap();
        let _rx2 = bus.subscribe("t").unwrap();
        assert_eq!(bus.subscriber_count("t"), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count("t"), 1);
    }

    #[tokio::test]
    async fn backlog_counts_unread_messages() {
        let bus = IpcBus::new(8);
        assert_eq!(bus.capacity(), 8);
        let mut sub = bus.subscribe("t").unwrap();

        bus.publish("t", b"1".to_vec()).await.unwrap();
        bus.publish("t", b"2".to_vec()).await.unwrap();
        assert_eq!(bus.backlog("t"), 2);

        sub.next().await.unwrap();
        assert_eq!(bus.backlog("t"), 1);
        assert_eq!(bus.backlog("other"), 0);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let bus = IpcBus::with_config(BusConfig {
            capacity: 4,
            max_payload_bytes: 8,
        });
        let _sub = bus.subscribe("t").unwrap();

        let err = bus.publish("t", vec![0u8; 9]).await.unwrap_err();
        assert!(matches!(
            err,
            BusError::PayloadTooLarge { size: 9, limit: 8 }
        ));
    }

    #[tokio::test]
    async fn invalid_topic_is_rejected() {
        let bus = IpcBus::new(4);
        assert!(matches!(
            bus.subscribe(""),
            Err(BusError::InvalidTopic { .. })
        ));
        assert!(matches!(
            bus.publish("has space", vec![]).await,
            Err(BusError::InvalidTopic { .. })
        ));
    }

    #[tokio::test]
    async fn close_ends_subscriptions_and_rejects_publish() {
        let bus = IpcBus::new(4);
        let mut sub = bus.subscribe("t").unwrap();

        bus.close();
        assert!(bus.is_closed());
        assert!(sub.next().await.is_none());
        assert!(matches!(
            bus.publish("t", b"late".to_vec()).await,
            Err(BusError::Closed)
        ));
        assert!(matches!(bus.subscribe("t"), Err(BusError::Closed)));
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_and_continues() {
        let bus = IpcBus::new(2);
        let mut sub = bus.subscribe("t").unwrap();

        for i in 0..5u8 {
            bus.publish("t", vec![i]).await.unwrap();
        }

        // Capacity 2: the oldest three were overwritten.
        let first = sub.next().await.expect("message after lag");
        assert_eq!(first.payload, vec![3]);
        let second = sub.next().await.expect("next message");
        assert_eq!(second.payload, vec![4]);
    }
}
