//! Telemetry channels reported by the environment sensor board.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One measured quantity in a telemetry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Temperature,
    Humidity,
    Light,
}

impl Channel {
    /// Every channel, in payload order.
    pub const ALL: [Channel; 3] = [Channel::Temperature, Channel::Humidity, Channel::Light];

    /// Field name in payloads and event names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Temperature => "temperature",
            Channel::Humidity => "humidity",
            Channel::Light => "light",
        }
    }

    /// Static unit attached to every reading of this channel.
    pub fn unit(&self) -> &'static str {
        match self {
            Channel::Temperature => "°C",
            Channel::Humidity => "%",
            Channel::Light => "lux",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" | "temp" => Ok(Channel::Temperature),
            "humidity" => Ok(Channel::Humidity),
            "light" => Ok(Channel::Light),
            other => Err(crate::Error::Validation(format!("unknown channel '{}'", other))),
        }
    }
}
