//! Rust library for controlling multi-zone amplifiers that speak the Matrio Control protocol
//!
//! This library provides an async client for the binary TCP protocol used by the
//! Dayton Audio DAX88 and compatible whole-house amplifiers. It supports:
//!
//! - Persistent connection with automatic reconnect and keepalive
//! - Power, volume, mute, balance, bass, treble and input control per zone
//! - Group commands addressing several zones in one frame
//! - Zone and input renaming
//! - A cached view of every zone, updated from device broadcasts
//! - Real-time state update subscriptions
//!
//! # Quick Start
//!
//! ```no_run
//! use matrio_control::{ClientConfig, MatrioClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("192.168.1.50").with_display_name("Whole House Audio");
//!     let client = MatrioClient::connect(config).await?;
//!
//!     // Control a zone
//!     let living_room = client.zone(1)?;
//!     living_room.set_power(true)?;
//!     living_room.set_volume(20)?;
//!     living_room.select_input_by_name("TV")?;
//!
//!     // Group command: mute zones 2 and 3 together
//!     client.commands().set_mute([2, 3], true)?;
//!
//!     // Subscribe to state updates
//!     let mut updates = client.subscribe_state();
//!     while let Ok(update) = updates.recv().await {
//!         println!("State update: {:?}", update);
//!         break; // Just show one update
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: Connection ownership, state access and subscriptions
//! - **Commands** / **Zone**: Validated control API
//! - **State**: Per-zone cache updated by broadcasts and optimistic writes
//! - **Connection**: TCP session, reconnect with backoff, keepalive
//! - **Protocol**: Binary frame encoding and decoding
//! - **Types**: Domain types and data structures

mod client;
mod commands;
mod config;
mod connection;
mod error;
pub mod protocol;
mod state;
mod subscription;
mod types;
mod zone;
mod zones;

// Public exports
pub use client::MatrioClient;
pub use commands::CommandDispatcher;
pub use config::{ClientConfig, DEFAULT_PORT};
pub use error::{MatrioError, Result};
pub use state::StateCache;
pub use subscription::{
    ConnectionEvent, ConnectionReceiver, StateReceiver, StateUpdate, ZoneChange,
};
pub use types::{
    ConnectionState, DeviceInfo, DeviceSnapshot, InputId, Setting, ZoneField, ZoneId, ZoneState,
    BALANCE_MAX, BALANCE_MIN, DEFAULT_INPUT_COUNT, DEFAULT_ZONE_COUNT, MAX_NAME_LEN, TONE_MAX,
    TONE_MIN, VOLUME_MAX, VOLUME_MIN,
};
pub use zone::Zone;
pub use zones::{ZoneSelector, MAX_ZONES};
