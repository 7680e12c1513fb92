//! Reconnect-triggered state replay.
//!
//! When a device reports that it is back online, every actuator with a
//! successful command in its history gets that command replayed so the
//! physical state matches the last acknowledged one. Replays are ephemeral
//! and run concurrently; one failing actuator does not affect the others.

use std::sync::Arc;

use futures::future::join_all;
use iotgate_storage::{CatalogStore, HistoryStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatcher::CommandDispatcher;
use crate::error::Result;

/// Summary of one recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Actuators a command was replayed for.
    pub replayed: usize,
    pub succeeded: usize,
    /// Replays that timed out or errored.
    pub failed: usize,
    /// Actuators with no successful command on record.
    pub skipped: usize,
}

pub struct ReconnectRecovery {
    catalog: Arc<dyn CatalogStore>,
    history: Arc<dyn HistoryStore>,
    dispatcher: Arc<CommandDispatcher>,
}

impl ReconnectRecovery {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        history: Arc<dyn HistoryStore>,
        dispatcher: Arc<CommandDispatcher>,
    ) -> Self {
        Self {
            catalog,
            history,
            dispatcher,
        }
    }

    /// Handle a device status message `{isConnected}`.
    ///
    /// Recovery runs only when `isConnected` is `true`.
    pub async fn handle_status(&self, payload: &Value) -> Result<Option<RecoveryReport>> {
        let connected = payload
            .get("isConnected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !connected {
            tracing::debug!("device status without isConnected=true, no recovery");
            return Ok(None);
        }
        self.on_device_reconnected().await.map(Some)
    }

    /// Replay the last successful command of every actuator.
    pub async fn on_device_reconnected(&self) -> Result<RecoveryReport> {
        let actuators = self.catalog.list_actuators().await?;
        let mut report = RecoveryReport::default();
        let mut replays = Vec::new();

        for actuator in &actuators {
            match self.history.latest_success(actuator.id).await {
                Ok(Some(record)) => replays.push((record.action_id, actuator.id)),
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(actuator_id = actuator.id, "history lookup failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            actuators = actuators.len(),
            replays = replays.len(),
            "device reconnected, replaying last known states"
        );

        let results = join_all(replays.iter().map(|(action_id, actuator_id)| {
            self.dispatcher.trigger(*action_id, *actuator_id, false)
        }))
        .await;

        report.replayed = replays.len();
        for ((action_id, actuator_id), result) in replays.iter().zip(results) {
            match result {
                Ok(outcome) if outcome.status => report.succeeded += 1,
                Ok(outcome) => {
                    tracing::warn!(action_id, actuator_id, "replay failed: {}", outcome.message);
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(action_id, actuator_id, "replay failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "recovery finished"
        );
        Ok(report)
    }
}
