//! Device catalog storage using redb.
//!
//! Holds the metadata the gateway core reads: devices, actions, actuators
//! and sensors. Full CRUD over this data belongs to the management API;
//! the core only needs lookups plus the actuator state update that follows
//! a successful command.

use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

type JsonTable = TableDefinition<'static, u64, &'static str>;

const DEVICES_TABLE: JsonTable = TableDefinition::new("devices");
const ACTIONS_TABLE: JsonTable = TableDefinition::new("actions");
const ACTUATORS_TABLE: JsonTable = TableDefinition::new("actuators");
const SENSORS_TABLE: JsonTable = TableDefinition::new("sensors");

/// A physical device hosting sensors and actuators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: u64,
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
}

/// A named target state that can be applied to an actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: u64,
    pub device_id: u64,
    pub name: String,
    /// State sent to the actuator, e.g. `"on"`.
    pub state: String,
}

/// A controllable output on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actuator {
    pub id: u64,
    pub device_id: u64,
    pub name: String,
    /// Last state confirmed by the device.
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: u64,
    pub device_id: u64,
    pub name: String,
}

/// Read access to the catalog needed by command dispatch and recovery.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_action(&self, id: u64) -> Result<Option<Action>>;

    async fn get_actuator(&self, id: u64) -> Result<Option<Actuator>>;

    async fn list_actuators(&self) -> Result<Vec<Actuator>>;

    /// Record the state an actuator confirmed.
    async fn update_actuator_state(&self, id: u64, state: &str) -> Result<()>;
}

/// Catalog store backed by redb.
pub struct RedbCatalog {
    db: Arc<Database>,
}

impl RedbCatalog {
    /// Wrap a database, creating the catalog tables if needed.
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        {
            let _devices = write_txn.open_table(DEVICES_TABLE)?;
            let _actions = write_txn.open_table(ACTIONS_TABLE)?;
            let _actuators = write_txn.open_table(ACTUATORS_TABLE)?;
            let _sensors = write_txn.open_table(SENSORS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn save<T: Serialize>(&self, table: JsonTable, id: u64, item: &T) -> Result<()> {
        let json = serde_json::to_string(item)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table)?;
            table.insert(id, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn load<T: for<'de> Deserialize<'de>>(
        &self,
        table: JsonTable,
        id: u64,
    ) -> Result<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    fn list<T: for<'de> Deserialize<'de>>(&self, table: JsonTable) -> Result<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        let mut items = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            match serde_json::from_str(value.value()) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!("Skipping unreadable catalog entry: {}", e),
            }
        }
        Ok(items)
    }

    // ========== Devices ==========

    pub fn save_device(&self, device: &Device) -> Result<()> {
        self.save(DEVICES_TABLE, device.id, device)
    }

    pub fn load_device(&self, id: u64) -> Result<Option<Device>> {
        self.load(DEVICES_TABLE, id)
    }

    pub fn list_devices(&self) -> Result<Vec<Device>> {
        self.list(DEVICES_TABLE)
    }

    // ========== Actions ==========

    pub fn save_action(&self, action: &Action) -> Result<()> {
        self.save(ACTIONS_TABLE, action.id, action)
    }

    pub fn load_action(&self, id: u64) -> Result<Option<Action>> {
        self.load(ACTIONS_TABLE, id)
    }

    pub fn list_actions(&self) -> Result<Vec<Action>> {
        self.list(ACTIONS_TABLE)
    }

    // ========== Actuators ==========

    pub fn save_actuator(&self, actuator: &Actuator) -> Result<()> {
        self.save(ACTUATORS_TABLE, actuator.id, actuator)
    }

    pub fn load_actuator(&self, id: u64) -> Result<Option<Actuator>> {
        self.load(ACTUATORS_TABLE, id)
    }

    pub fn list_all_actuators(&self) -> Result<Vec<Actuator>> {
        self.list(ACTUATORS_TABLE)
    }

    /// Set an actuator's state in a single write transaction.
    pub fn set_actuator_state(&self, id: u64, state: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACTUATORS_TABLE)?;
            let mut actuator: Actuator = match table.get(id)? {
                Some(value) => serde_json::from_str(value.value())?,
                None => return Err(Error::NotFound(format!("actuator {}", id))),
            };
            actuator.state = state.to_string();
            let json = serde_json::to_string(&actuator)?;
            table.insert(id, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ========== Sensors ==========

    pub fn save_sensor(&self, sensor: &Sensor) -> Result<()> {
        self.save(SENSORS_TABLE, sensor.id, sensor)
    }

    pub fn load_sensor(&self, id: u64) -> Result<Option<Sensor>> {
        self.load(SENSORS_TABLE, id)
    }

    pub fn list_sensors(&self) -> Result<Vec<Sensor>> {
        self.list(SENSORS_TABLE)
    }
}

#[async_trait]
impl CatalogStore for RedbCatalog {
    async fn get_action(&self, id: u64) -> Result<Option<Action>> {
        self.load_action(id)
    }

    async fn get_actuator(&self, id: u64) -> Result<Option<Actuator>> {
        self.load_actuator(id)
    }

    async fn list_actuators(&self) -> Result<Vec<Actuator>> {
        self.list_all_actuators()
    }

    async fn update_actuator_state(&self, id: u64, state: &str) -> Result<()> {
        self.set_actuator_state(id, state)
    }
}
