//! Shared redb database handle.

use std::path::Path;
use std::sync::Arc;

use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};

use crate::Result;

// Id counters: key = sequence name, value = last issued id
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("id_counters");

/// Open or create a database file, creating parent directories as needed.
pub fn open_database<P: AsRef<Path>>(path: P) -> Result<Arc<Database>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::create(path)?;
    init_counters(&db)?;
    tracing::debug!(path = %path.display(), "opened redb database");
    Ok(Arc::new(db))
}

/// Create a database that lives only in memory.
pub fn memory_database() -> Result<Arc<Database>> {
    let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
    init_counters(&db)?;
    Ok(Arc::new(db))
}

fn init_counters(db: &Database) -> Result<()> {
    let write_txn = db.begin_write()?;
    {
        let _counters = write_txn.open_table(COUNTERS_TABLE)?;
    }
    write_txn.commit()?;
    Ok(())
}

/// Issue the next id of a sequence inside an open write transaction.
pub(crate) fn next_id(txn: &WriteTransaction, sequence: &str) -> Result<u64> {
    let mut table = txn.open_table(COUNTERS_TABLE)?;
    let next = table.get(sequence)?.map(|v| v.value()).unwrap_or(0) + 1;
    table.insert(sequence, next)?;
    Ok(next)
}
