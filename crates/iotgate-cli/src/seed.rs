//! Catalog seeding from a JSON file.
//!
//! The file is a list of `{ "table": ..., "initData": [...] }` entries.
//! Rows whose id already exists are left untouched, so seeding twice is
//! harmless.

use std::path::Path;

use anyhow::{Context, Result};
use iotgate_storage::{Action, Actuator, Device, RedbCatalog, Sensor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedTable {
    table: String,
    #[serde(default)]
    init_data: Vec<Value>,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub inserted: usize,
    pub skipped: usize,
}

pub fn seed_file(catalog: &RedbCatalog, path: &Path) -> Result<SeedReport> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read seed file {}", path.display()))?;
    seed_json(catalog, &text)
}

pub fn seed_json(catalog: &RedbCatalog, text: &str) -> Result<SeedReport> {
    let tables: Vec<SeedTable> = serde_json::from_str(text).context("invalid seed file")?;
    let mut report = SeedReport::default();

    for table in tables {
        match table.table.as_str() {
            "devices" => seed_rows(&table.init_data, &mut report, |d: Device| {
                if catalog.load_device(d.id)?.is_some() {
                    return Ok(false);
                }
                catalog.save_device(&d)?;
                Ok(true)
            })?,
            "actions" => seed_rows(&table.init_data, &mut report, |a: Action| {
                if catalog.load_action(a.id)?.is_some() {
                    return Ok(false);
                }
                catalog.save_action(&a)?;
                Ok(true)
            })?,
            "actuators" => seed_rows(&table.init_data, &mut report, |a: Actuator| {
                if catalog.load_actuator(a.id)?.is_some() {
                    return Ok(false);
                }
                catalog.save_actuator(&a)?;
                Ok(true)
            })?,
            "sensors" => seed_rows(&table.init_data, &mut report, |s: Sensor| {
                if catalog.load_sensor(s.id)?.is_some() {
                    return Ok(false);
                }
                catalog.save_sensor(&s)?;
                Ok(true)
            })?,
            other => tracing::warn!(table = other, "unknown seed table skipped"),
        }
    }

    Ok(report)
}

fn seed_rows<T, F>(rows: &[Value], report: &mut SeedReport, mut insert: F) -> Result<()>
where
    T: for<'de> Deserialize<'de>,
    F: FnMut(T) -> iotgate_storage::Result<bool>,
{
    for row in rows {
        let item: T = serde_json::from_value(row.clone())
            .with_context(|| format!("invalid seed row {}", row))?;
        if insert(item)? {
            report.inserted += 1;
        } else {
            tracing::info!(%row, "already exists, skipped");
            report.skipped += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotgate_storage::memory_database;

    const SEED: &str = r#"[
        {"table": "devices", "initData": [{"id": 1, "type": "esp32", "name": "Greenhouse board"}]},
        {"table": "actuators", "initData": [{"id": 7, "device_id": 1, "name": "Fan", "state": "off"}]},
        {"table": "actions", "initData": [{"id": 5, "device_id": 1, "name": "Fan on", "state": "on"}]},
        {"table": "pumps", "initData": [{"id": 1}]}
    ]"#;

    #[test]
    fn test_seed_twice_skips_existing() {
        let catalog = RedbCatalog::new(memory_database().unwrap()).unwrap();

        let first = seed_json(&catalog, SEED).unwrap();
        assert_eq!(first, SeedReport { inserted: 3, skipped: 0 });
        assert_eq!(catalog.load_action(5).unwrap().unwrap().state, "on");

        catalog.set_actuator_state(7, "on").unwrap();
        let second = seed_json(&catalog, SEED).unwrap();
        assert_eq!(second, SeedReport { inserted: 0, skipped: 3 });
        // Existing rows are not overwritten.
        assert_eq!(catalog.load_actuator(7).unwrap().unwrap().state, "on");
    }

    #[test]
    fn test_bad_row_is_an_error() {
        let catalog = RedbCatalog::new(memory_database().unwrap()).unwrap();
        let bad = r#"[{"table": "actions", "initData": [{"id": "x"}]}]"#;
        assert!(seed_json(&catalog, bad).is_err());
    }
}
