//! Events pushed to live dashboard observers.

use serde::{Deserialize, Serialize};

use crate::channel::Channel;

/// Event delivered to realtime observers.
///
/// The serialized form carries an `event` tag naming the variant. Channel
/// values all share the `channel_value` tag, so transports emit under
/// [`RealtimeEvent::name`], which resolves them to the channel name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// Sent once to an observer right after it connects.
    ConnectionStatus {
        status: String,
        client_id: String,
        timestamp: i64,
    },

    /// Raw validated telemetry payload.
    Reading {
        payload: serde_json::Value,
        source: String,
        timestamp: i64,
    },

    /// One channel value from a telemetry payload.
    ChannelValue {
        channel: Channel,
        value: f64,
        unit: String,
        timestamp: i64,
    },
}

impl RealtimeEvent {
    /// Build a channel event with the channel's static unit.
    pub fn channel_value(channel: Channel, value: f64, timestamp: i64) -> Self {
        Self::ChannelValue {
            channel,
            value,
            unit: channel.unit().to_string(),
            timestamp,
        }
    }

    /// Event name as seen by dashboard clients.
    pub fn name(&self) -> &str {
        match self {
            Self::ConnectionStatus { .. } => "connection_status",
            Self::Reading { .. } => "reading",
            Self::ChannelValue { channel, .. } => channel.as_str(),
        }
    }

    /// Timestamp of the event in milliseconds.
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::ConnectionStatus { timestamp, .. }
            | Self::Reading { timestamp, .. }
            | Self::ChannelValue { timestamp, .. } => *timestamp,
        }
    }
}
