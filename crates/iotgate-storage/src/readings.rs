//! Sensor reading storage.
//!
//! Readings are append-only. They are keyed by `(channel, timestamp, id)` so
//! a time-range query for one channel is a single ordered range scan.

use std::sync::Arc;

use async_trait::async_trait;
use iotgate_core::Channel;
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::database::next_id;
use crate::{Error, Result};

// Readings table: key = (channel, timestamp_ms, id), value = SensorReading (JSON)
const READINGS_TABLE: TableDefinition<(&str, i64, u64), &str> =
    TableDefinition::new("sensor_readings");

/// One stored telemetry value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: u64,
    pub sensor_id: u64,
    pub channel: Channel,
    pub unit: String,
    pub value: f64,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

/// A reading before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub sensor_id: u64,
    pub channel: Channel,
    pub value: f64,
    pub timestamp: i64,
}

impl NewReading {
    pub fn new(sensor_id: u64, channel: Channel, value: f64, timestamp: i64) -> Self {
        Self {
            sensor_id,
            channel,
            value,
            timestamp,
        }
    }
}

/// Append-only reading persistence.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn append(&self, reading: NewReading) -> Result<SensorReading>;

    /// Readings of one channel with `start <= timestamp <= end`, oldest first.
    async fn query_range(&self, channel: Channel, start: i64, end: i64) -> Result<Vec<SensorReading>>;
}

/// Reading store backed by redb.
pub struct RedbReadings {
    db: Arc<Database>,
}

impl RedbReadings {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        {
            let _readings = write_txn.open_table(READINGS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    pub fn insert(&self, reading: NewReading) -> Result<SensorReading> {
        if !reading.value.is_finite() {
            return Err(Error::InvalidInput(format!(
                "non-finite {} value",
                reading.channel
            )));
        }

        let write_txn = self.db.begin_write()?;
        let stored = {
            let id = next_id(&write_txn, "sensor_readings")?;
            let stored = SensorReading {
                id,
                sensor_id: reading.sensor_id,
                channel: reading.channel,
                unit: reading.channel.unit().to_string(),
                value: reading.value,
                timestamp: reading.timestamp,
            };
            let mut table = write_txn.open_table(READINGS_TABLE)?;
            let json = serde_json::to_string(&stored)?;
            table.insert(
                (reading.channel.as_str(), reading.timestamp, id),
                json.as_str(),
            )?;
            stored
        };
        write_txn.commit()?;
        Ok(stored)
    }

    pub fn range(&self, channel: Channel, start: i64, end: i64) -> Result<Vec<SensorReading>> {
        if start > end {
            return Ok(Vec::new());
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(READINGS_TABLE)?;

        let start_key = (channel.as_str(), start, 0u64);
        let end_key = (channel.as_str(), end, u64::MAX);

        let mut readings = Vec::new();
        for result in table.range(start_key..=end_key)? {
            let (_key, value) = result?;
            match serde_json::from_str::<SensorReading>(value.value()) {
                Ok(reading) => readings.push(reading),
                Err(e) => tracing::warn!("Skipping unreadable {} reading: {}", channel, e),
            }
        }
        Ok(readings)
    }
}

#[async_trait]
impl ReadingStore for RedbReadings {
    async fn append(&self, reading: NewReading) -> Result<SensorReading> {
        self.insert(reading)
    }

    async fn query_range(&self, channel: Channel, start: i64, end: i64) -> Result<Vec<SensorReading>> {
        self.range(channel, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_database;

    #[test]
    fn test_insert_assigns_unit_and_id() {
        let store = RedbReadings::new(memory_database().unwrap()).unwrap();
        let stored = store
            .insert(NewReading::new(1, Channel::Temperature, 24.5, 1_000))
            .unwrap();
        assert_eq!(stored.unit, "°C");
        assert_eq!(stored.id, 1);
    }

    #[test]
    fn test_range_is_per_channel_and_inclusive() {
        let store = RedbReadings::new(memory_database().unwrap()).unwrap();
        for ts in [1_000, 2_000, 3_000, 4_000] {
            store.insert(NewReading::new(1, Channel::Temperature, ts as f64, ts)).unwrap();
            store.insert(NewReading::new(2, Channel::Humidity, 50.0, ts)).unwrap();
        }

        let readings = store.range(Channel::Temperature, 2_000, 3_000).unwrap();
        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.channel == Channel::Temperature));
        assert_eq!(readings[0].timestamp, 2_000);
        assert_eq!(readings[1].timestamp, 3_000);

        assert!(store.range(Channel::Light, 0, 10_000).unwrap().is_empty());
        assert!(store.range(Channel::Temperature, 5_000, 1_000).unwrap().is_empty());
    }

    #[test]
    fn test_same_timestamp_kept_apart() {
        let store = RedbReadings::new(memory_database().unwrap()).unwrap();
        store.insert(NewReading::new(3, Channel::Light, 100.0, 1_000)).unwrap();
        store.insert(NewReading::new(3, Channel::Light, 200.0, 1_000)).unwrap();
        assert_eq!(store.range(Channel::Light, 1_000, 1_000).unwrap().len(), 2);
    }

    #[test]
    fn test_rejects_nan() {
        let store = RedbReadings::new(memory_database().unwrap()).unwrap();
        let result = store.insert(NewReading::new(1, Channel::Light, f64::NAN, 1));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
