//! Persistent storage for the iotgate device gateway.
//!
//! All stores share one redb database:
//! - **catalog**: devices, actions, actuators and sensors
//! - **history**: action history records with one-shot status transitions
//! - **readings**: append-only sensor readings indexed by channel and time
//!
//! The gateway core depends only on the [`CatalogStore`], [`HistoryStore`]
//! and [`ReadingStore`] traits.

pub mod catalog;
pub mod database;
pub mod error;
pub mod history;
pub mod readings;

use std::path::Path;
use std::sync::Arc;

pub use catalog::{Action, Actuator, CatalogStore, Device, RedbCatalog, Sensor};
pub use database::{memory_database, open_database};
pub use error::{Error, Result};
pub use history::{ActionHistoryRecord, ActionStatus, HistoryStore, RedbHistory};
pub use readings::{NewReading, ReadingStore, RedbReadings, SensorReading};

/// All gateway stores over a single database.
#[derive(Clone)]
pub struct GatewayStore {
    pub catalog: Arc<RedbCatalog>,
    pub history: Arc<RedbHistory>,
    pub readings: Arc<RedbReadings>,
}

impl GatewayStore {
    /// Open or create the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_database(open_database(path)?)
    }

    /// Create an in-memory store.
    pub fn memory() -> Result<Self> {
        Self::from_database(memory_database()?)
    }

    fn from_database(db: Arc<redb::Database>) -> Result<Self> {
        Ok(Self {
            catalog: Arc::new(RedbCatalog::new(db.clone())?),
            history: Arc::new(RedbHistory::new(db.clone())?),
            readings: Arc::new(RedbReadings::new(db)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotgate_core::Channel;

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gateway.redb");

        {
            let store = GatewayStore::open(&path).unwrap();
            store
                .readings
                .insert(NewReading::new(1, Channel::Humidity, 61.0, 500))
                .unwrap();
            store.history.insert_pending(5, 7, 500).unwrap();
        }

        let store = GatewayStore::open(&path).unwrap();
        assert_eq!(store.readings.range(Channel::Humidity, 0, 1_000).unwrap().len(), 1);
        // Ids keep counting after a reopen.
        let next = store.history.insert_pending(5, 7, 600).unwrap();
        assert_eq!(next.id, 2);
    }
}
