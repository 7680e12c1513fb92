//! Realtime fan-out to dashboard observers.
//!
//! Delivery is best-effort: no acknowledgment, retry, replay or
//! backpressure. An observer whose delivery fails simply misses the event.

use std::collections::HashMap;
use std::sync::Arc;

use iotgate_core::RealtimeEvent;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::error::{DeviceError, Result};

/// Something that receives realtime events.
pub trait Observer: Send + Sync {
    /// Unique observer id.
    fn id(&self) -> &str;

    /// Hand over one event without waiting.
    fn deliver(&self, event: &RealtimeEvent) -> Result<()>;
}

/// Observer backed by a bounded channel, one per live socket.
pub struct ChannelObserver {
    id: String,
    tx: mpsc::Sender<RealtimeEvent>,
}

impl ChannelObserver {
    pub fn new(id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { id: id.into(), tx }, rx)
    }
}

impl Observer for ChannelObserver {
    fn id(&self) -> &str {
        &self.id
    }

    fn deliver(&self, event: &RealtimeEvent) -> Result<()> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                DeviceError::Transport(format!("observer {} is full", self.id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                DeviceError::Transport(format!("observer {} is closed", self.id))
            }
        })
    }
}

/// Observer that discards everything.
pub struct NullObserver {
    id: String,
}

impl NullObserver {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Observer for NullObserver {
    fn id(&self) -> &str {
        &self.id
    }

    fn deliver(&self, _event: &RealtimeEvent) -> Result<()> {
        Ok(())
    }
}

/// Observer that keeps every event it receives.
pub struct RecordingObserver {
    id: String,
    events: Mutex<Vec<RealtimeEvent>>,
}

impl RecordingObserver {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<RealtimeEvent> {
        self.events.lock().clone()
    }

    /// Names of the received events, in order.
    pub fn event_names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name().to_string()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Observer for RecordingObserver {
    fn id(&self) -> &str {
        &self.id
    }

    fn deliver(&self, event: &RealtimeEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Set of connected observers.
#[derive(Default)]
pub struct RealtimeBroadcaster {
    observers: RwLock<HashMap<String, Arc<dyn Observer>>>,
}

impl RealtimeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer and greet it with a `connection_status` event.
    ///
    /// An observer with the same id replaces the previous one.
    pub fn connect(&self, observer: Arc<dyn Observer>) {
        let id = observer.id().to_string();
        let greeting = RealtimeEvent::ConnectionStatus {
            status: "connected".to_string(),
            client_id: id.clone(),
            timestamp: iotgate_core::now_millis(),
        };
        if let Err(e) = observer.deliver(&greeting) {
            tracing::debug!(observer = %id, "connection status not delivered: {}", e);
        }

        let count = {
            let mut observers = self.observers.write();
            observers.insert(id.clone(), observer);
            observers.len()
        };
        tracing::info!(observer = %id, observers = count, "observer connected");
    }

    /// Remove an observer. Returns `false` if it was not connected.
    pub fn disconnect(&self, id: &str) -> bool {
        let removed = self.observers.write().remove(id).is_some();
        if removed {
            tracing::info!(observer = %id, "observer disconnected");
        }
        removed
    }

    /// Push an event to every connected observer.
    ///
    /// Returns how many observers accepted it.
    pub fn broadcast(&self, event: &RealtimeEvent) -> usize {
        let observers: Vec<Arc<dyn Observer>> = self.observers.read().values().cloned().collect();

        let mut delivered = 0;
        for observer in observers {
            match observer.deliver(event) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(observer = observer.id(), event = event.name(), "delivery failed: {}", e)
                }
            }
        }
        delivered
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotgate_core::Channel;

    #[test]
    fn test_connect_sends_connection_status() {
        let broadcaster = RealtimeBroadcaster::new();
        let observer = Arc::new(RecordingObserver::new("dash-1"));
        broadcaster.connect(observer.clone());

        assert_eq!(broadcaster.observer_count(), 1);
        match &observer.events()[0] {
            RealtimeEvent::ConnectionStatus { client_id, status, .. } => {
                assert_eq!(client_id, "dash-1");
                assert_eq!(status, "connected");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_disconnected_observer_gets_nothing() {
        let broadcaster = RealtimeBroadcaster::new();
        let observer = Arc::new(RecordingObserver::new("dash-1"));
        broadcaster.connect(observer.clone());
        observer.clear();

        assert!(broadcaster.disconnect("dash-1"));
        assert!(!broadcaster.disconnect("dash-1"));

        let event = RealtimeEvent::channel_value(Channel::Light, 300.0, 1);
        assert_eq!(broadcaster.broadcast(&event), 0);
        assert!(observer.events().is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_block_others() {
        let broadcaster = RealtimeBroadcaster::new();
        let (closed, rx) = ChannelObserver::new("closed", 4);
        drop(rx);
        let (live, mut live_rx) = ChannelObserver::new("live", 4);
        broadcaster.connect(Arc::new(closed));
        broadcaster.connect(Arc::new(live));
        broadcaster.connect(Arc::new(NullObserver::new("null")));

        let event = RealtimeEvent::channel_value(Channel::Temperature, 21.5, 1);
        assert_eq!(broadcaster.broadcast(&event), 2);

        assert_eq!(live_rx.recv().await.unwrap().name(), "connection_status");
        assert_eq!(live_rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_full_channel_drops_event() {
        let (observer, _rx) = ChannelObserver::new("slow", 1);
        let event = RealtimeEvent::channel_value(Channel::Humidity, 40.0, 1);
        assert!(observer.deliver(&event).is_ok());
        assert!(matches!(observer.deliver(&event), Err(DeviceError::Transport(_))));
    }
}
