//! MQTT message bus built on rumqttc.
//!
//! Payloads are JSON on both directions. Subscriptions are remembered and
//! re-issued after every broker reconnect, since the session is not kept.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use iotgate_core::bus::DEFAULT_BUS_CAPACITY;
use iotgate_core::config::MqttConfig;
use iotgate_core::{BusMessage, BusReceiver, Error, MessageBus, Result};
use parking_lot::RwLock;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const REQUEST_CAPACITY: usize = 64;

pub struct MqttBus {
    client: AsyncClient,
    inbound: broadcast::Sender<BusMessage>,
    subscriptions: Arc<RwLock<Vec<String>>>,
    event_task: JoinHandle<()>,
}

impl MqttBus {
    /// Create the client and start its event loop. Must be called inside a
    /// tokio runtime; the connection itself is made lazily by the loop.
    pub fn connect(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound, _) = broadcast::channel(DEFAULT_BUS_CAPACITY);
        let subscriptions = Arc::new(RwLock::new(Vec::new()));

        let event_task = tokio::spawn(run_event_loop(
            event_loop,
            client.clone(),
            inbound.clone(),
            subscriptions.clone(),
        ));

        tracing::info!(host = %config.host, port = config.port, client_id = %config.client_id, "MQTT bus starting");
        Self {
            client,
            inbound,
            subscriptions,
            event_task,
        }
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    inbound: broadcast::Sender<BusMessage>,
    subscriptions: Arc<RwLock<Vec<String>>>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("connected to MQTT broker");
                for topic in subscriptions.read().iter() {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        tracing::warn!(topic = %topic, "resubscribe failed: {}", e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match serde_json::from_slice::<serde_json::Value>(&publish.payload) {
                    Ok(payload) => {
                        // No receivers is not an error.
                        let _ = inbound.send(BusMessage::new(publish.topic, payload));
                    }
                    Err(e) => {
                        tracing::warn!(topic = %publish.topic, "dropping non-JSON payload: {}", e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("MQTT connection error: {}, retrying", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, bytes)
            .await
            .map_err(|e| Error::Transport(format!("publish to '{}' failed: {}", topic, e)))
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        {
            let mut subscriptions = self.subscriptions.write();
            if !subscriptions.iter().any(|t| t == topic) {
                subscriptions.push(topic.to_string());
            }
        }
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::Transport(format!("subscribe to '{}' failed: {}", topic, e)))
    }

    fn messages(&self) -> BusReceiver {
        BusReceiver::new(self.inbound.subscribe())
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}
