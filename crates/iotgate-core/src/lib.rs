//! Core types for the iotgate device gateway.
//!
//! This crate defines the abstractions shared by the storage, device and
//! CLI crates: the unified error type, configuration, the message bus seam
//! and the realtime event model.

pub mod bus;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;

pub use bus::{BusMessage, BusReceiver, InMemoryBus, MessageBus, topic_matches};
pub use channel::Channel;
pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use event::RealtimeEvent;

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
