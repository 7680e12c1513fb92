//! Routing of inbound bus messages.
//!
//! The listener is the only consumer of the bus receiver. Acknowledgments go
//! straight to the correlation broker; telemetry and status messages are
//! handled on their own tasks so a slow store or a recovery pass never holds
//! up acknowledgment matching.

use std::sync::Arc;

use iotgate_core::config::TopicConfig;
use iotgate_core::{BusMessage, MessageBus};
use tokio::task::JoinHandle;

use crate::broker::CorrelationBroker;
use crate::error::{DeviceError, Result};
use crate::recovery::ReconnectRecovery;
use crate::telemetry::TelemetryIngestor;

pub struct BusListener {
    bus: Arc<dyn MessageBus>,
    broker: Arc<CorrelationBroker>,
    ingestor: Arc<TelemetryIngestor>,
    recovery: Arc<ReconnectRecovery>,
    topics: TopicConfig,
}

impl BusListener {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        broker: Arc<CorrelationBroker>,
        ingestor: Arc<TelemetryIngestor>,
        recovery: Arc<ReconnectRecovery>,
        topics: TopicConfig,
    ) -> Self {
        Self {
            bus,
            broker,
            ingestor,
            recovery,
            topics,
        }
    }

    /// Subscribe to the inbound topics and start routing.
    ///
    /// The returned task ends when the bus closes.
    pub async fn start(self: Arc<Self>) -> Result<JoinHandle<()>> {
        // Take the receiver before subscribing so nothing is missed.
        let mut rx = self.bus.messages();
        for topic in [&self.topics.telemetry, &self.topics.ack, &self.topics.status] {
            self.bus
                .subscribe(topic)
                .await
                .map_err(|e| DeviceError::Transport(e.to_string()))?;
        }
        tracing::info!(
            bus = self.bus.name(),
            telemetry = %self.topics.telemetry,
            ack = %self.topics.ack,
            status = %self.topics.status,
            "bus listener started"
        );

        let listener = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                listener.route(message);
            }
            tracing::info!("bus closed, listener stopped");
        }))
    }

    /// Route one message to its handler.
    pub fn route(self: &Arc<Self>, message: BusMessage) {
        let topic = message.topic.as_str();
        if topic == self.topics.ack {
            self.broker.deliver(topic, &message.payload);
        } else if topic == self.topics.telemetry {
            let ingestor = self.ingestor.clone();
            tokio::spawn(async move {
                ingestor.ingest(&message.payload).await;
            });
        } else if topic == self.topics.status {
            let recovery = self.recovery.clone();
            tokio::spawn(async move {
                if let Err(e) = recovery.handle_status(&message.payload).await {
                    tracing::error!("reconnect recovery failed: {}", e);
                }
            });
        } else {
            tracing::debug!(topic, "no route for message");
        }
    }
}
