//! Message bus abstraction.
//!
//! The gateway talks to devices through a publish/subscribe bus with no
//! request/reply semantics. [`MessageBus`] is the seam between the core and
//! a concrete transport (MQTT in production, [`InMemoryBus`] for tests and
//! local runs). Inbound messages for subscribed topics are fanned out on a
//! broadcast channel; consumers obtain a [`BusReceiver`] via
//! [`MessageBus::messages`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{Error, Result};

/// Default channel capacity for inbound bus messages.
pub const DEFAULT_BUS_CAPACITY: usize = 1000;

/// A message received from (or published to) the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: serde_json::Value,
    /// Receive time in milliseconds.
    pub received_at: i64,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            received_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Publish/subscribe client used by the gateway core.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Bus name for logging.
    fn name(&self) -> &str;

    /// Publish a JSON message on a topic.
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<()>;

    /// Express interest in a topic. Messages on subscribed topics are
    /// delivered through [`MessageBus::messages`].
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Receiver for inbound messages on subscribed topics.
    fn messages(&self) -> BusReceiver;
}

/// Receiver for inbound bus messages.
pub struct BusReceiver {
    rx: broadcast::Receiver<BusMessage>,
}

impl BusReceiver {
    pub fn new(rx: broadcast::Receiver<BusMessage>) -> Self {
        Self { rx }
    }

    /// Receive the next message.
    ///
    /// Returns `None` once the bus is closed. Lagged messages are skipped.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "bus receiver lagged, messages dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

/// MQTT-style topic filter match supporting `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// In-process bus.
///
/// Publishing to a subscribed topic loops the message back to receivers,
/// the same way a broker would echo it to this client. Every publication is
/// also mirrored on [`InMemoryBus::outbound`] so a simulated device can react
/// to commands, and devices inject their own messages with
/// [`InMemoryBus::inject`].
#[derive(Clone)]
pub struct InMemoryBus {
    inbound: broadcast::Sender<BusMessage>,
    outbound: broadcast::Sender<BusMessage>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    published: Arc<RwLock<Vec<BusMessage>>>,
    fail_publish: Arc<AtomicBool>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inbound: broadcast::channel(capacity).0,
            outbound: broadcast::channel(capacity).0,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            published: Arc::new(RwLock::new(Vec::new())),
            fail_publish: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Deliver a message as if a device had published it.
    ///
    /// Returns `true` if the topic is subscribed and at least one receiver
    /// got the message.
    pub fn inject(&self, topic: &str, payload: serde_json::Value) -> bool {
        if !self.is_subscribed(topic) {
            tracing::debug!(topic, "dropping message on unsubscribed topic");
            return false;
        }
        self.inbound.send(BusMessage::new(topic, payload)).is_ok()
    }

    /// Stream of every message published through this bus.
    pub fn outbound(&self) -> BusReceiver {
        BusReceiver::new(self.outbound.subscribe())
    }

    /// Snapshot of all publications so far.
    pub fn published(&self) -> Vec<BusMessage> {
        self.published.read().clone()
    }

    /// Publications on one topic.
    pub fn published_on(&self, topic: &str) -> Vec<BusMessage> {
        self.published
            .read()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Make subsequent publishes fail with a transport error.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .read()
            .iter()
            .any(|filter| topic_matches(filter, topic))
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("publish to '{}' rejected", topic)));
        }
        let message = BusMessage::new(topic, payload.clone());
        self.published.write().push(message.clone());
        let _ = self.outbound.send(message.clone());
        if self.is_subscribed(topic) {
            let _ = self.inbound.send(message);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscriptions.write().insert(topic.to_string());
        Ok(())
    }

    fn messages(&self) -> BusReceiver {
        BusReceiver::new(self.inbound.subscribe())
    }
}
