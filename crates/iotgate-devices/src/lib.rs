//! Device coordination for the iotgate gateway.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `mqtt` | ✅ | MQTT message bus (rumqttc) |
//!
//! ## Architecture
//!
//! - **CorrelationBroker**: matches acknowledgments to waiting commands
//! - **CommandDispatcher**: publishes actuator commands and tracks their history
//! - **ReconnectRecovery**: replays last known actuator states after a reconnect
//! - **TelemetryIngestor**: validates, stores and broadcasts sensor telemetry
//! - **Downsampler**: fixed-length averaged series over a trailing window
//! - **RealtimeBroadcaster**: best-effort fan-out to dashboard observers
//! - **BusListener**: routes inbound bus topics to the components above
//!
//! [`Gateway`] wires all of them over one store and one bus.

pub mod broadcast;
pub mod broker;
pub mod dispatcher;
pub mod downsample;
pub mod error;
pub mod listener;
pub mod recovery;
pub mod telemetry;

#[cfg(feature = "mqtt")]
pub mod mqtt;

use std::sync::Arc;

use iotgate_core::{GatewayConfig, MessageBus};
use iotgate_storage::GatewayStore;
use tokio::task::JoinHandle;

pub use broadcast::{ChannelObserver, NullObserver, Observer, RealtimeBroadcaster, RecordingObserver};
pub use broker::{AckOutcome, CorrelationBroker, PendingAck};
pub use dispatcher::{CommandDispatcher, DispatcherConfig, TriggerResult};
pub use downsample::{Downsampler, RecentWindow, TimeSlot};
pub use error::{DeviceError, Result};
pub use listener::BusListener;
pub use recovery::{ReconnectRecovery, RecoveryReport};
pub use telemetry::{IngestOutcome, TelemetryIngestor, TelemetryPayload};

#[cfg(feature = "mqtt")]
pub use mqtt::MqttBus;

/// All gateway components sharing one store, bus and broker.
pub struct Gateway {
    pub broker: Arc<CorrelationBroker>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub recovery: Arc<ReconnectRecovery>,
    pub ingestor: Arc<TelemetryIngestor>,
    pub downsampler: Arc<Downsampler>,
    pub broadcaster: Arc<RealtimeBroadcaster>,
    pub listener: Arc<BusListener>,
}

impl Gateway {
    pub fn new(config: &GatewayConfig, store: &GatewayStore, bus: Arc<dyn MessageBus>) -> Self {
        let broker = Arc::new(CorrelationBroker::new());
        let broadcaster = Arc::new(RealtimeBroadcaster::new());

        let dispatcher = Arc::new(CommandDispatcher::new(
            store.catalog.clone(),
            store.history.clone(),
            bus.clone(),
            broker.clone(),
            DispatcherConfig::from(config),
        ));
        let recovery = Arc::new(ReconnectRecovery::new(
            store.catalog.clone(),
            store.history.clone(),
            dispatcher.clone(),
        ));
        let ingestor = Arc::new(
            TelemetryIngestor::new(
                store.readings.clone(),
                broadcaster.clone(),
                config.channels.clone(),
            )
            .with_source(bus.name()),
        );
        let downsampler = Arc::new(Downsampler::new(
            store.readings.clone(),
            config.downsample.clone(),
        ));
        let listener = Arc::new(BusListener::new(
            bus,
            broker.clone(),
            ingestor.clone(),
            recovery.clone(),
            config.topics.clone(),
        ));

        Self {
            broker,
            dispatcher,
            recovery,
            ingestor,
            downsampler,
            broadcaster,
            listener,
        }
    }

    /// Subscribe and start routing inbound messages.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        self.listener.clone().start().await
    }
}
