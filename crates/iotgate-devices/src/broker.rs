//! Correlation broker - request/reply on top of publish/subscribe.
//!
//! A dispatcher registers a waiter for `(topic, correlation_id)` before it
//! publishes a command, then waits on it with a deadline. The bus listener
//! hands every acknowledgment to [`CorrelationBroker::deliver`], which
//! resolves the matching waiter.
//!
//! Delivery and timeout race for the same waiter. Whoever removes the entry
//! from the waiter map first owns the resolution; the loser does nothing.
//! An acknowledgment that arrives after its waiter timed out finds no entry
//! and is dropped. There is no buffering for late or unknown ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{DeviceError, Result};

type WaiterKey = (String, String);

struct Waiter {
    token: u64,
    tx: oneshot::Sender<Value>,
}

/// How a waiter was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    /// The acknowledgment message that matched.
    Matched(Value),
    /// No acknowledgment before the deadline.
    TimedOut,
}

impl AckOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Matched(payload) => Some(payload),
            Self::TimedOut => None,
        }
    }
}

/// Registry of live waiters keyed by `(topic, correlation_id)`.
#[derive(Clone, Default)]
pub struct CorrelationBroker {
    waiters: Arc<DashMap<WaiterKey, Waiter>>,
    next_token: Arc<AtomicU64>,
}

impl CorrelationBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a waiter. Fails if one is already live for the same key.
    pub fn register(&self, topic: &str, correlation_id: &str) -> Result<PendingAck> {
        let key = (topic.to_string(), correlation_id.to_string());
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        match self.waiters.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(DeviceError::Conflict(format!(
                    "waiter already registered for {} on '{}'",
                    correlation_id, topic
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(Waiter { token, tx });
            }
        }

        tracing::debug!(topic, correlation_id, "registered ack waiter");
        Ok(PendingAck {
            waiters: self.waiters.clone(),
            key,
            token,
            rx: Some(rx),
        })
    }

    /// Register and wait in one step.
    pub async fn register_and_wait(
        &self,
        topic: &str,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<AckOutcome> {
        Ok(self.register(topic, correlation_id)?.wait(timeout).await)
    }

    /// Hand an inbound message to its waiter.
    ///
    /// Returns `true` if a live waiter took the message.
    pub fn deliver(&self, topic: &str, message: &Value) -> bool {
        let Some(correlation_id) = extract_correlation_id(message) else {
            tracing::debug!(topic, "ack without correlation id dropped");
            return false;
        };

        match self.waiters.remove(&(topic.to_string(), correlation_id.clone())) {
            Some((_, waiter)) => {
                let delivered = waiter.tx.send(message.clone()).is_ok();
                tracing::debug!(topic, %correlation_id, delivered, "ack matched waiter");
                delivered
            }
            None => {
                tracing::debug!(topic, %correlation_id, "no live waiter, ack dropped");
                false
            }
        }
    }

    pub fn is_pending(&self, topic: &str, correlation_id: &str) -> bool {
        self.waiters
            .contains_key(&(topic.to_string(), correlation_id.to_string()))
    }

    /// Number of live waiters.
    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }
}

/// A registered waiter. Dropping it before resolution removes the waiter.
pub struct PendingAck {
    waiters: Arc<DashMap<WaiterKey, Waiter>>,
    key: WaiterKey,
    token: u64,
    rx: Option<oneshot::Receiver<Value>>,
}

impl PendingAck {
    pub fn topic(&self) -> &str {
        &self.key.0
    }

    pub fn correlation_id(&self) -> &str {
        &self.key.1
    }

    /// Suspend until the acknowledgment arrives or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> AckOutcome {
        let Some(mut rx) = self.rx.take() else {
            return AckOutcome::TimedOut;
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(payload)) => AckOutcome::Matched(payload),
            Ok(Err(_)) => AckOutcome::TimedOut,
            Err(_) => {
                if self.remove_own_entry() {
                    tracing::debug!(
                        topic = %self.key.0,
                        correlation_id = %self.key.1,
                        "ack wait timed out"
                    );
                    return AckOutcome::TimedOut;
                }
                // A delivery removed the entry first; its send is already
                // committed, so the payload is in (or about to reach) rx.
                match rx.await {
                    Ok(payload) => AckOutcome::Matched(payload),
                    Err(_) => AckOutcome::TimedOut,
                }
            }
        }
    }

    fn remove_own_entry(&self) -> bool {
        self.waiters
            .remove_if(&self.key, |_, waiter| waiter.token == self.token)
            .is_some()
    }
}

impl Drop for PendingAck {
    fn drop(&mut self) {
        self.remove_own_entry();
    }
}

/// Correlation id of an acknowledgment.
///
/// Accepts `correlationId` and the older `messageId` field, as a string or
/// a number.
pub fn extract_correlation_id(message: &Value) -> Option<String> {
    let raw = message
        .get("correlationId")
        .or_else(|| message.get("messageId"))?;
    match raw {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ACK: &str = "device/ack";

    #[tokio::test]
    async fn test_deliver_resolves_waiter() {
        let broker = CorrelationBroker::new();
        let pending = broker.register(ACK, "abc").unwrap();
        assert!(broker.is_pending(ACK, "abc"));

        assert!(broker.deliver(ACK, &json!({"correlationId": "abc", "isSuccess": true})));
        let outcome = pending.wait(Duration::from_secs(1)).await;

        assert!(outcome.is_matched());
        assert_eq!(outcome.payload().unwrap()["isSuccess"], true);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_ack_is_dropped() {
        let broker = CorrelationBroker::new();
        let outcome = broker
            .register_and_wait(ACK, "late", Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(outcome, AckOutcome::TimedOut);
        assert_eq!(broker.pending_count(), 0);

        assert!(!broker.deliver(ACK, &json!({"correlationId": "late"})));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let broker = CorrelationBroker::new();
        let _first = broker.register(ACK, "dup").unwrap();
        assert!(matches!(broker.register(ACK, "dup"), Err(DeviceError::Conflict(_))));
        // Same id on another topic is a different waiter.
        assert!(broker.register("other/ack", "dup").is_ok());
    }

    #[tokio::test]
    async fn test_drop_removes_waiter() {
        let broker = CorrelationBroker::new();
        {
            let _pending = broker.register(ACK, "gone").unwrap();
            assert_eq!(broker.pending_count(), 1);
        }
        assert_eq!(broker.pending_count(), 0);
        assert!(broker.register(ACK, "gone").is_ok());
    }

    #[tokio::test]
    async fn test_wrong_topic_or_unknown_id_dropped() {
        let broker = CorrelationBroker::new();
        let _pending = broker.register(ACK, "abc").unwrap();

        assert!(!broker.deliver("device/status", &json!({"correlationId": "abc"})));
        assert!(!broker.deliver(ACK, &json!({"correlationId": "zzz"})));
        assert!(!broker.deliver(ACK, &json!({"isSuccess": true})));
        assert!(broker.is_pending(ACK, "abc"));
    }

    #[tokio::test]
    async fn test_second_delivery_is_noop() {
        let broker = CorrelationBroker::new();
        let pending = broker.register(ACK, "once").unwrap();

        assert!(broker.deliver(ACK, &json!({"correlationId": "once", "n": 1})));
        assert!(!broker.deliver(ACK, &json!({"correlationId": "once", "n": 2})));

        let outcome = pending.wait(Duration::from_secs(1)).await;
        assert_eq!(outcome.payload().unwrap()["n"], 1);
    }

    #[test]
    fn test_extract_correlation_id() {
        assert_eq!(extract_correlation_id(&json!({"correlationId": "x"})).as_deref(), Some("x"));
        assert_eq!(extract_correlation_id(&json!({"messageId": 17})).as_deref(), Some("17"));
        assert_eq!(extract_correlation_id(&json!({"correlationId": ""})), None);
        assert_eq!(extract_correlation_id(&json!({"correlationId": true})), None);
        assert_eq!(extract_correlation_id(&json!("plain")), None);
    }
}
