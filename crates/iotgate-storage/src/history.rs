//! Action history storage.
//!
//! One record per persisted command dispatch. A record is created in
//! `pending` status and moves exactly once to `success` or `failed`; the
//! store refuses any transition out of a terminal status.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::database::next_id;
use crate::{Error, Result};

// History table: key = record id, value = ActionHistoryRecord (JSON)
const HISTORY_TABLE: TableDefinition<u64, &str> = TableDefinition::new("action_history");

/// Lifecycle status of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Success,
    Failed,
}

impl ActionStatus {
    /// Check if the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionHistoryRecord {
    pub id: u64,
    pub action_id: u64,
    pub actuator_id: u64,
    pub status: ActionStatus,
    /// Dispatch start, milliseconds since the epoch.
    pub timestamp: i64,
    /// When the record reached its terminal status.
    pub completed_at: Option<i64>,
}

/// History persistence used by the command dispatcher and recovery.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create a `pending` record for a dispatch starting now.
    async fn create_pending(&self, action_id: u64, actuator_id: u64) -> Result<ActionHistoryRecord>;

    /// Move a pending record to a terminal status.
    async fn finalize(&self, id: u64, status: ActionStatus) -> Result<ActionHistoryRecord>;

    async fn get(&self, id: u64) -> Result<Option<ActionHistoryRecord>>;

    /// Most recent `success` record for an actuator (latest timestamp wins).
    async fn latest_success(&self, actuator_id: u64) -> Result<Option<ActionHistoryRecord>>;

    /// All records for an actuator, newest first.
    async fn list_by_actuator(&self, actuator_id: u64) -> Result<Vec<ActionHistoryRecord>>;
}

/// History store backed by redb.
pub struct RedbHistory {
    db: Arc<Database>,
}

impl RedbHistory {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        {
            let _history = write_txn.open_table(HISTORY_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    /// Insert a new record with the given start time.
    pub fn insert_pending(
        &self,
        action_id: u64,
        actuator_id: u64,
        timestamp: i64,
    ) -> Result<ActionHistoryRecord> {
        let write_txn = self.db.begin_write()?;
        let record = {
            let id = next_id(&write_txn, "action_history")?;
            let record = ActionHistoryRecord {
                id,
                action_id,
                actuator_id,
                status: ActionStatus::Pending,
                timestamp,
                completed_at: None,
            };
            let mut table = write_txn.open_table(HISTORY_TABLE)?;
            let json = serde_json::to_string(&record)?;
            table.insert(id, json.as_str())?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Apply a terminal status, rejecting records that already left `pending`.
    pub fn set_status(
        &self,
        id: u64,
        status: ActionStatus,
        completed_at: i64,
    ) -> Result<ActionHistoryRecord> {
        if !status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "record {} cannot be moved back to {}",
                id, status
            )));
        }

        let write_txn = self.db.begin_write()?;
        let record = {
            let mut table = write_txn.open_table(HISTORY_TABLE)?;
            let mut record: ActionHistoryRecord = match table.get(id)? {
                Some(value) => serde_json::from_str(value.value())?,
                None => return Err(Error::NotFound(format!("action history {}", id))),
            };
            if record.status.is_terminal() {
                return Err(Error::InvalidTransition {
                    id,
                    from: record.status.to_string(),
                    to: status.to_string(),
                });
            }
            record.status = status;
            record.completed_at = Some(completed_at);
            let json = serde_json::to_string(&record)?;
            table.insert(id, json.as_str())?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    pub fn load(&self, id: u64) -> Result<Option<ActionHistoryRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HISTORY_TABLE)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// List all records, newest first.
    pub fn list_all(&self) -> Result<Vec<ActionHistoryRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HISTORY_TABLE)?;

        let mut records = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            if let Ok(record) = serde_json::from_str::<ActionHistoryRecord>(value.value()) {
                records.push(record);
            }
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(records)
    }
}

#[async_trait]
impl HistoryStore for RedbHistory {
    async fn create_pending(&self, action_id: u64, actuator_id: u64) -> Result<ActionHistoryRecord> {
        self.insert_pending(action_id, actuator_id, chrono::Utc::now().timestamp_millis())
    }

    async fn finalize(&self, id: u64, status: ActionStatus) -> Result<ActionHistoryRecord> {
        self.set_status(id, status, chrono::Utc::now().timestamp_millis())
    }

    async fn get(&self, id: u64) -> Result<Option<ActionHistoryRecord>> {
        self.load(id)
    }

    async fn latest_success(&self, actuator_id: u64) -> Result<Option<ActionHistoryRecord>> {
        // list_all is sorted newest first, ties broken by the higher id
        Ok(self
            .list_all()?
            .into_iter()
            .find(|r| r.actuator_id == actuator_id && r.status == ActionStatus::Success))
    }

    async fn list_by_actuator(&self, actuator_id: u64) -> Result<Vec<ActionHistoryRecord>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|r| r.actuator_id == actuator_id)
            .collect())
    }
}
