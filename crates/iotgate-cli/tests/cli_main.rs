//! Basic CLI tests for the iotgate binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn iotgate(storage: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("iotgate").unwrap();
    cmd.env("IOTGATE_STORAGE_PATH", storage)
        .env_remove("IOTGATE_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("iotgate").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("trigger"))
        .stdout(predicate::str::contains("window"))
        .stdout(predicate::str::contains("seed"));
}

#[test]
fn test_no_subcommand_shows_error() {
    let mut cmd = Command::cargo_bin("iotgate").unwrap();
    cmd.assert().failure();
}

#[test]
fn test_window_on_empty_store_prints_zero_series() {
    let dir = tempfile::tempdir().unwrap();
    let output = iotgate(&dir.path().join("gateway.redb"))
        .args(["window", "--window-secs", "10", "--slot-secs", "2"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let window: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    for channel in ["temperature", "humidity", "light"] {
        let series = window[channel].as_array().unwrap();
        assert_eq!(series.len(), 5);
        assert!(series.iter().all(|slot| slot["value"] == 0.0));
    }
}

#[test]
fn test_window_rejects_zero_slot() {
    let dir = tempfile::tempdir().unwrap();
    iotgate(&dir.path().join("gateway.redb"))
        .args(["window", "--slot-secs", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid parameter"));
}

#[test]
fn test_seed_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("gateway.redb");
    let seed = dir.path().join("init-data.json");
    std::fs::write(
        &seed,
        r#"[
            {"table": "devices", "initData": [{"id": 1, "type": "esp32", "name": "Board"}]},
            {"table": "actuators", "initData": [{"id": 7, "device_id": 1, "name": "Fan", "state": "off"}]}
        ]"#,
    )
    .unwrap();

    iotgate(&storage)
        .arg("seed")
        .arg(&seed)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"inserted":2,"skipped":0}"#));

    iotgate(&storage)
        .arg("seed")
        .arg(&seed)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"inserted":0,"skipped":2}"#));
}

#[test]
fn test_seed_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    iotgate(&dir.path().join("gateway.redb"))
        .args(["seed", "does-not-exist.json"])
        .assert()
        .failure();
}
