//! Command dispatch with acknowledgment correlation.
//!
//! A trigger publishes `{state, actuatorId, correlationId}` on the command
//! topic and waits, bounded, for an acknowledgment carrying the same
//! correlation id on the ack topic. Persisted triggers leave an action
//! history record that moves from `pending` to `success` or `failed`
//! exactly once. Ephemeral triggers (used by reconnect recovery) write no
//! history.

use std::sync::Arc;
use std::time::Duration;

use iotgate_core::config::TopicConfig;
use iotgate_core::{GatewayConfig, MessageBus};
use iotgate_storage::{ActionHistoryRecord, ActionStatus, CatalogStore, HistoryStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::broker::{AckOutcome, CorrelationBroker, PendingAck};
use crate::error::{DeviceError, Result};

const MAX_ID_ATTEMPTS: usize = 8;

/// Result of a trigger.
///
/// `status` is `false` only when no acknowledgment arrived in time; lookup,
/// transport and storage failures are returned as errors instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResult {
    pub status: bool,
    pub message: String,
    pub correlation_id: String,
    /// History record id, `None` for ephemeral dispatches.
    pub history_id: Option<u64>,
}

/// Topics and timeout used by the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub command_topic: String,
    pub ack_topic: String,
    pub subscribe_topic: String,
    pub timeout: Duration,
}

impl DispatcherConfig {
    pub fn from_topics(topics: &TopicConfig, timeout: Duration) -> Self {
        Self {
            command_topic: topics.command.clone(),
            ack_topic: topics.ack.clone(),
            subscribe_topic: topics.subscribe.clone(),
            timeout,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for DispatcherConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self::from_topics(
            &config.topics,
            Duration::from_millis(config.command.timeout_ms),
        )
    }
}

/// Publishes actuator commands and resolves them through the broker.
pub struct CommandDispatcher {
    catalog: Arc<dyn CatalogStore>,
    history: Arc<dyn HistoryStore>,
    bus: Arc<dyn MessageBus>,
    broker: Arc<CorrelationBroker>,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        history: Arc<dyn HistoryStore>,
        bus: Arc<dyn MessageBus>,
        broker: Arc<CorrelationBroker>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            catalog,
            history,
            bus,
            broker,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Send the action's state to an actuator and wait for the device to
    /// acknowledge it.
    pub async fn trigger(
        &self,
        action_id: u64,
        actuator_id: u64,
        persist: bool,
    ) -> Result<TriggerResult> {
        let action = self
            .catalog
            .get_action(action_id)
            .await?
            .ok_or_else(|| DeviceError::NotFound(format!("action {}", action_id)))?;
        let actuator = self
            .catalog
            .get_actuator(actuator_id)
            .await?
            .ok_or_else(|| DeviceError::NotFound(format!("actuator {}", actuator_id)))?;

        let pending = self.register_waiter()?;
        let correlation_id = pending.correlation_id().to_string();

        let record = if persist {
            Some(self.history.create_pending(action.id, actuator.id).await?)
        } else {
            None
        };

        tracing::info!(
            action_id,
            actuator_id,
            %correlation_id,
            persist,
            state = %action.state,
            "dispatching command"
        );

        if let Err(e) = self.publish_command(&action.state, actuator.id, &correlation_id).await {
            tracing::error!(action_id, actuator_id, %correlation_id, "command publish failed: {}", e);
            if let Some(record) = &record {
                self.finalize_after_transport_error(record).await;
            }
            return Err(e);
        }

        match pending.wait(self.config.timeout).await {
            AckOutcome::Matched(ack) => {
                if ack.get("isSuccess").and_then(|v| v.as_bool()) == Some(false) {
                    tracing::warn!(
                        %correlation_id,
                        "device reported isSuccess=false, treating matched ack as success"
                    );
                }
                if let Some(record) = &record {
                    self.history.finalize(record.id, ActionStatus::Success).await?;
                }
                if let Err(e) = self
                    .catalog
                    .update_actuator_state(actuator.id, &action.state)
                    .await
                {
                    tracing::warn!(actuator_id, "failed to update actuator state: {}", e);
                }
                tracing::info!(action_id, actuator_id, %correlation_id, "command acknowledged");
                Ok(TriggerResult {
                    status: true,
                    message: format!("Actuator {} set to '{}'", actuator.id, action.state),
                    correlation_id,
                    history_id: record.map(|r| r.id),
                })
            }
            AckOutcome::TimedOut => {
                if let Some(record) = &record {
                    self.history.finalize(record.id, ActionStatus::Failed).await?;
                }
                tracing::warn!(
                    action_id,
                    actuator_id,
                    %correlation_id,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "no acknowledgment before timeout"
                );
                Ok(TriggerResult {
                    status: false,
                    message: format!(
                        "No acknowledgment from actuator {} within {} ms",
                        actuator.id,
                        self.config.timeout.as_millis()
                    ),
                    correlation_id,
                    history_id: record.map(|r| r.id),
                })
            }
        }
    }

    fn register_waiter(&self) -> Result<PendingAck> {
        let mut last_err = None;
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = Uuid::new_v4().to_string();
            match self.broker.register(&self.config.ack_topic, &id) {
                Ok(pending) => return Ok(pending),
                Err(e @ DeviceError::Conflict(_)) => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            DeviceError::Conflict("could not allocate a correlation id".to_string())
        }))
    }

    async fn publish_command(&self, state: &str, actuator_id: u64, correlation_id: &str) -> Result<()> {
        self.bus
            .publish(
                &self.config.subscribe_topic,
                &json!({ "topic": self.config.ack_topic }),
            )
            .await
            .map_err(|e| DeviceError::Transport(e.to_string()))?;

        let command = json!({
            "state": state,
            "actuatorId": actuator_id,
            "correlationId": correlation_id,
        });
        self.bus
            .publish(&self.config.command_topic, &command)
            .await
            .map_err(|e| DeviceError::Transport(e.to_string()))
    }

    // The command never left, so the record cannot stay pending.
    async fn finalize_after_transport_error(&self, record: &ActionHistoryRecord) {
        if let Err(e) = self.history.finalize(record.id, ActionStatus::Failed).await {
            tracing::warn!(history_id = record.id, "failed to close history record: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotgate_core::InMemoryBus;
    use iotgate_storage::{Action, Actuator, GatewayStore};

    fn seeded_store() -> GatewayStore {
        let store = GatewayStore::memory().unwrap();
        store
            .catalog
            .save_action(&Action {
                id: 5,
                device_id: 1,
                name: "Fan on".to_string(),
                state: "on".to_string(),
            })
            .unwrap();
        store
            .catalog
            .save_actuator(&Actuator {
                id: 7,
                device_id: 1,
                name: "Fan".to_string(),
                state: "off".to_string(),
            })
            .unwrap();
        store
    }

    fn dispatcher(store: &GatewayStore, bus: &InMemoryBus, timeout: Duration) -> CommandDispatcher {
        let config = DispatcherConfig {
            timeout,
            ..DispatcherConfig::default()
        };
        CommandDispatcher::new(
            store.catalog.clone(),
            store.history.clone(),
            Arc::new(bus.clone()),
            Arc::new(CorrelationBroker::new()),
            config,
        )
    }

    #[tokio::test]
    async fn test_unknown_action_is_not_found() {
        let store = seeded_store();
        let bus = InMemoryBus::new();
        let dispatcher = dispatcher(&store, &bus, Duration::from_secs(1));

        let err = dispatcher.trigger(99, 7, true).await.unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(_)));
        let err = dispatcher.trigger(5, 99, true).await.unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(_)));

        assert!(bus.published().is_empty());
        assert!(store.history.list_all().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_record_failed() {
        let store = seeded_store();
        let bus = InMemoryBus::new();
        let dispatcher = dispatcher(&store, &bus, Duration::from_secs(10));

        let result = dispatcher.trigger(5, 7, true).await.unwrap();
        assert!(!result.status);

        let record = store.history.load(result.history_id.unwrap()).unwrap().unwrap();
        assert_eq!(record.status, ActionStatus::Failed);
        // Actuator state is left alone without an acknowledgment.
        assert_eq!(store.catalog.load_actuator(7).unwrap().unwrap().state, "off");
    }

    #[tokio::test]
    async fn test_publish_failure_is_transport_error() {
        let store = seeded_store();
        let bus = InMemoryBus::new();
        bus.set_fail_publish(true);
        let dispatcher = dispatcher(&store, &bus, Duration::from_secs(1));

        let err = dispatcher.trigger(5, 7, true).await.unwrap_err();
        assert!(matches!(err, DeviceError::Transport(_)));

        let records = store.history.list_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ActionStatus::Failed);
        assert_eq!(dispatcher.broker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_and_subscribe_intent_published() {
        let store = seeded_store();
        let bus = InMemoryBus::new();
        let dispatcher = dispatcher(&store, &bus, Duration::from_millis(50));

        let result = dispatcher.trigger(5, 7, false).await.unwrap();
        assert!(result.history_id.is_none());
        assert!(store.history.list_all().unwrap().is_empty());

        let intents = bus.published_on("device/subscribe");
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].payload["topic"], "device/ack");

        let commands = bus.published_on("device/command");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].payload["state"], "on");
        assert_eq!(commands[0].payload["actuatorId"], 7);
        assert_eq!(commands[0].payload["correlationId"], result.correlation_id.as_str());
    }
}
