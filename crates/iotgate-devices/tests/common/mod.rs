//! Shared fixtures for gateway integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use iotgate_core::{GatewayConfig, InMemoryBus};
use iotgate_devices::Gateway;
use iotgate_storage::{Action, Actuator, GatewayStore};
use serde_json::json;
use tokio::task::JoinHandle;

pub const COMMAND_TOPIC: &str = "device/command";
pub const ACK_TOPIC: &str = "device/ack";
pub const STATUS_TOPIC: &str = "device/status";
pub const TELEMETRY_TOPIC: &str = "realtime_data";

pub fn action(id: u64, state: &str) -> Action {
    Action {
        id,
        device_id: 1,
        name: format!("Set {}", state),
        state: state.to_string(),
    }
}

pub fn actuator(id: u64, state: &str) -> Actuator {
    Actuator {
        id,
        device_id: 1,
        name: format!("Actuator {}", id),
        state: state.to_string(),
    }
}

/// Store with action 5 (`on`) and actuator 7 (`off`).
pub fn seeded_store() -> GatewayStore {
    let store = GatewayStore::memory().unwrap();
    store.catalog.save_action(&action(5, "on")).unwrap();
    store.catalog.save_actuator(&actuator(7, "off")).unwrap();
    store
}

pub struct Harness {
    pub store: GatewayStore,
    pub bus: InMemoryBus,
    pub gateway: Gateway,
    pub listener: JoinHandle<()>,
}

pub async fn start_gateway(store: GatewayStore) -> Harness {
    let bus = InMemoryBus::new();
    let gateway = Gateway::new(&GatewayConfig::default(), &store, Arc::new(bus.clone()));
    let listener = gateway.start().await.unwrap();
    Harness {
        store,
        bus,
        gateway,
        listener,
    }
}

/// A device that answers every command with an ack after `delay`.
pub fn spawn_device(bus: &InMemoryBus, delay: Duration) -> JoinHandle<()> {
    spawn_device_reporting(bus, delay, true)
}

/// Like [`spawn_device`], with a fixed `isSuccess` flag in every ack.
pub fn spawn_device_reporting(
    bus: &InMemoryBus,
    delay: Duration,
    is_success: bool,
) -> JoinHandle<()> {
    let mut outbound = bus.outbound();
    let bus = bus.clone();
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if message.topic != COMMAND_TOPIC {
                continue;
            }
            let correlation_id = message.payload["correlationId"].clone();
            let bus = bus.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                bus.inject(
                    ACK_TOPIC,
                    json!({"correlationId": correlation_id, "isSuccess": is_success}),
                );
            });
        }
    })
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn eventually<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
