//! Gateway configuration.
//!
//! Configuration is read from an optional TOML file and then overridden by
//! `IOTGATE_*` environment variables. Every field has a default, so an empty
//! file (or no file) yields a usable local setup.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::error::{Error, Result};

/// Default bus topics.
pub mod topics {
    pub const TELEMETRY: &str = "realtime_data";
    pub const ACK: &str = "device/ack";
    pub const STATUS: &str = "device/status";
    pub const COMMAND: &str = "device/command";
    pub const SUBSCRIBE: &str = "device/subscribe";
}

/// Default values.
pub mod defaults {
    pub const MQTT_HOST: &str = "localhost";
    pub const MQTT_PORT: u16 = 1883;
    pub const MQTT_CLIENT_ID: &str = "iotgate";
    pub const MQTT_KEEP_ALIVE_SECS: u64 = 30;
    pub const STORAGE_PATH: &str = "data/iotgate.redb";
    /// Acknowledgment timeout for a dispatched command.
    pub const COMMAND_TIMEOUT_MS: u64 = 10_000;
    /// Trailing window of the live dashboard series.
    pub const WINDOW_SECS: u64 = 300;
    pub const SLOT_SECS: u64 = 2;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG: &str = "IOTGATE_CONFIG";
    pub const MQTT_HOST: &str = "IOTGATE_MQTT_HOST";
    pub const MQTT_PORT: &str = "IOTGATE_MQTT_PORT";
    pub const MQTT_USERNAME: &str = "IOTGATE_MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "IOTGATE_MQTT_PASSWORD";
    pub const STORAGE_PATH: &str = "IOTGATE_STORAGE_PATH";
    pub const COMMAND_TIMEOUT_MS: &str = "IOTGATE_COMMAND_TIMEOUT_MS";
    pub const LOG_JSON: &str = "IOTGATE_LOG_JSON";
}

/// Bus connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: defaults::MQTT_HOST.to_string(),
            port: defaults::MQTT_PORT,
            client_id: defaults::MQTT_CLIENT_ID.to_string(),
            username: None,
            password: None,
            keep_alive_secs: defaults::MQTT_KEEP_ALIVE_SECS,
        }
    }
}

/// Topic names for every bus interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub telemetry: String,
    pub ack: String,
    pub status: String,
    pub command: String,
    pub subscribe: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            telemetry: topics::TELEMETRY.to_string(),
            ack: topics::ACK.to_string(),
            status: topics::STATUS.to_string(),
            command: topics::COMMAND.to_string(),
            subscribe: topics::SUBSCRIBE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: defaults::STORAGE_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub timeout_ms: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::COMMAND_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownsampleConfig {
    pub window_secs: u64,
    pub slot_secs: u64,
}

impl Default for DownsampleConfig {
    fn default() -> Self {
        Self {
            window_secs: defaults::WINDOW_SECS,
            slot_secs: defaults::SLOT_SECS,
        }
    }
}

/// Sensor ids that readings of each channel are attributed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub temperature_sensor_id: u64,
    pub humidity_sensor_id: u64,
    pub light_sensor_id: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            temperature_sensor_id: 1,
            humidity_sensor_id: 2,
            light_sensor_id: 3,
        }
    }
}

impl ChannelConfig {
    pub fn sensor_id(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Temperature => self.temperature_sensor_id,
            Channel::Humidity => self.humidity_sensor_id,
            Channel::Light => self.light_sensor_id,
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub mqtt: MqttConfig,
    pub topics: TopicConfig,
    pub storage: StorageConfig,
    pub command: CommandConfig,
    pub downsample: DownsampleConfig,
    pub channels: ChannelConfig,
}

impl GatewayConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file (if given and present), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)?;
                tracing::info!(path = %path.display(), "loaded configuration file");
                toml::from_str(&text)?
            }
            Some(path) => {
                tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `IOTGATE_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var(env_vars::MQTT_HOST) {
            self.mqtt.host = host;
        }
        if let Some(port) = env_parse(env_vars::MQTT_PORT) {
            self.mqtt.port = port;
        }
        if let Ok(username) = std::env::var(env_vars::MQTT_USERNAME) {
            self.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var(env_vars::MQTT_PASSWORD) {
            self.mqtt.password = Some(password);
        }
        if let Ok(path) = std::env::var(env_vars::STORAGE_PATH) {
            self.storage.path = path;
        }
        if let Some(timeout) = env_parse(env_vars::COMMAND_TIMEOUT_MS) {
            self.command.timeout_ms = timeout;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.timeout_ms == 0 {
            return Err(Error::Config("command.timeout_ms must be positive".into()));
        }
        if self.downsample.window_secs == 0 || self.downsample.slot_secs == 0 {
            return Err(Error::Config(
                "downsample.window_secs and downsample.slot_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Whether JSON log output was requested.
pub fn json_logging() -> bool {
    env_parse(env_vars::LOG_JSON).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.topics.telemetry, "realtime_data");
        assert_eq!(config.command.timeout_ms, 10_000);
        assert_eq!(config.downsample.window_secs, 300);
        assert_eq!(config.downsample.slot_secs, 2);
        assert_eq!(config.channels.sensor_id(Channel::Light), 3);
    }

    #[test]
    fn test_partial_toml() {
        let config = GatewayConfig::from_toml(
            r#"
            [mqtt]
            host = "192.168.0.107"

            [command]
            timeout_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.mqtt.host, "192.168.0.107");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.command.timeout_ms, 2500);
        assert_eq!(config.topics.ack, "device/ack");
    }

    #[test]
    fn test_rejects_zero_slot() {
        let result = GatewayConfig::from_toml("[downsample]\nslot_secs = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iotgate.toml");
        std::fs::write(
            &path,
            "[topics]\ntelemetry = \"greenhouse/data\"\n\n[downsample]\nwindow_secs = 600\n",
        )
        .unwrap();

        // Neither section has an environment override.
        let config = GatewayConfig::load(Some(&path)).unwrap();
        assert_eq!(config.topics.telemetry, "greenhouse/data");
        assert_eq!(config.topics.ack, "device/ack");
        assert_eq!(config.downsample.window_secs, 600);
        assert_eq!(config.downsample.slot_secs, 2);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.topics.telemetry, "realtime_data");
        assert_eq!(config.downsample.window_secs, 300);
    }
}
