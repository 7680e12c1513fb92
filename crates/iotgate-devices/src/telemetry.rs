//! Telemetry ingestion.
//!
//! A telemetry payload carries one value per channel. The payload is
//! accepted only when all three channels are numeric; each channel is then
//! stored on its own, so a failed write for one channel never blocks the
//! others. Observers get the raw payload and one event per channel.

use std::sync::Arc;

use futures::future::join_all;
use iotgate_core::config::ChannelConfig;
use iotgate_core::{Channel, RealtimeEvent};
use iotgate_storage::{NewReading, ReadingStore};
use serde_json::Value;

use crate::broadcast::RealtimeBroadcaster;

/// Validated telemetry values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryPayload {
    pub temperature: f64,
    pub humidity: f64,
    pub light: f64,
}

impl TelemetryPayload {
    /// Parse a `{temperature, humidity, light}` object.
    ///
    /// `temp` is accepted in place of `temperature`.
    pub fn parse(payload: &Value) -> std::result::Result<Self, String> {
        if !payload.is_object() {
            return Err("payload is not an object".to_string());
        }
        Ok(Self {
            temperature: numeric_field(payload, &["temperature", "temp"])?,
            humidity: numeric_field(payload, &["humidity"])?,
            light: numeric_field(payload, &["light"])?,
        })
    }

    pub fn value(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Temperature => self.temperature,
            Channel::Humidity => self.humidity,
            Channel::Light => self.light,
        }
    }
}

fn numeric_field(payload: &Value, names: &[&str]) -> std::result::Result<f64, String> {
    let Some(raw) = names.iter().find_map(|name| payload.get(*name)) else {
        return Err(format!("missing field '{}'", names[0]));
    };
    raw.as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("field '{}' is not numeric", names[0]))
}

/// What happened to one telemetry payload.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Invalid payload; nothing stored or broadcast.
    Rejected(String),
    Ingested {
        persisted: Vec<Channel>,
        failed: Vec<Channel>,
    },
}

impl IngestOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

pub struct TelemetryIngestor {
    readings: Arc<dyn ReadingStore>,
    broadcaster: Arc<RealtimeBroadcaster>,
    channels: ChannelConfig,
    source: String,
}

impl TelemetryIngestor {
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        broadcaster: Arc<RealtimeBroadcaster>,
        channels: ChannelConfig,
    ) -> Self {
        Self {
            readings,
            broadcaster,
            channels,
            source: "mqtt".to_string(),
        }
    }

    /// Set the `source` reported on raw reading events.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Validate, store and broadcast one telemetry payload.
    pub async fn ingest(&self, payload: &Value) -> IngestOutcome {
        let values = match TelemetryPayload::parse(payload) {
            Ok(values) => values,
            Err(reason) => {
                tracing::warn!(%payload, "telemetry rejected: {}", reason);
                return IngestOutcome::Rejected(reason);
            }
        };

        let timestamp = iotgate_core::now_millis();
        let writes = Channel::ALL.iter().map(|&channel| {
            let reading = NewReading::new(
                self.channels.sensor_id(channel),
                channel,
                values.value(channel),
                timestamp,
            );
            async move { (channel, self.readings.append(reading).await) }
        });

        let mut persisted = Vec::new();
        let mut failed = Vec::new();
        for (channel, result) in join_all(writes).await {
            match result {
                Ok(_) => persisted.push(channel),
                Err(e) => {
                    tracing::error!(%channel, "failed to store reading: {}", e);
                    failed.push(channel);
                }
            }
        }

        self.broadcaster.broadcast(&RealtimeEvent::Reading {
            payload: payload.clone(),
            source: self.source.clone(),
            timestamp,
        });
        for channel in Channel::ALL {
            self.broadcaster.broadcast(&RealtimeEvent::channel_value(
                channel,
                values.value(channel),
                timestamp,
            ));
        }

        tracing::debug!(persisted = persisted.len(), failed = failed.len(), "telemetry ingested");
        IngestOutcome::Ingested { persisted, failed }
    }
}
