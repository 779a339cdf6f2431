//! # Voltage BACnet - Building Automation Protocol Library
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **License:** MIT
//!
//! An async BACnet/IP implementation in pure Rust for building automation and
//! energy management: device discovery, property access, change-of-value
//! subscriptions, trend log reads, and a virtual HVAC device for development
//! without hardware.
//!
//! ## Features
//!
//! - **Async Transport**: Single UDP socket with invoke-id correlation over Tokio
//! - **Discovery**: Who-Is / I-Am with instance-range scoping and a device cache
//! - **Property Access**: ReadProperty / WriteProperty with 16-slot priority commanding
//! - **COV Subscriptions**: Lifetime tracking, renewal and cancellation
//! - **Trend Logs**: Oldest-first log buffer reads with time filtering
//! - **Virtual Device**: A simulated single-zone air handler answering on its own socket
//!
//! ## Supported Services
//!
//! | Choice | Service | Kind |
//! |--------|---------|------|
//! | 8 | Who-Is | Unconfirmed |
//! | 0 | I-Am | Unconfirmed |
//! | 12 | ReadProperty | Confirmed |
//! | 15 | WriteProperty | Confirmed |
//! | 5 | SubscribeCOV | Confirmed |
//! | 1 / 2 | COV Notification | Confirmed / Unconfirmed |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_bacnet::{BacnetClient, BacnetResult, ClientConfig, DeviceRef};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> BacnetResult<()> {
//!     let client = BacnetClient::connect(ClientConfig::default()).await?;
//!
//!     // Find devices on the local network
//!     let devices = client.who_is(None, Duration::from_secs(3)).await?;
//!     for device in &devices {
//!         println!("device {} at {}", device.device_id, device.address);
//!     }
//!
//!     // Read the zone temperature from the first device
//!     if let Some(device) = devices.first() {
//!         let value = client
//!             .read(DeviceRef::Address(device.address), "analogInput:1", "presentValue")
//!             .await?;
//!         println!("zone temperature: {}", value.value);
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Protocol constants from ASHRAE 135
pub mod constants;

/// Endpoint address parsing and formatting
pub mod address;

/// Object types and identifiers
pub mod object;

/// Property values and the priority array
pub mod value;

/// Wire encoding: BVLL, NPDU, APDU and service payloads
pub mod codec;

/// UDP transport with invoke-id correlation
pub mod transport;

// ============================================================================
// Device-facing modules
// ============================================================================

/// In-memory object database
pub mod database;

/// Trend log records and the log buffer codec
pub mod trend;

/// COV subscription lifecycle
pub mod subscription;

/// High-level BACnet/IP client
pub mod client;

/// Virtual HVAC device for development and testing
pub mod simulator;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_bacnet::tokio) ===
pub use tokio;

// === Core client API ===
pub use client::{
    BacnetClient, ClientConfig, CovEvent, DeviceInfo, DeviceRef, DiscoveredDevice,
    ForeignDeviceConfig, ReliabilityStatus,
};

// === Error handling ===
pub use error::{BacnetError, BacnetResult};

// === Core types ===
pub use address::BacnetAddress;
pub use object::{ObjectIdentifier, ObjectType};
pub use value::{BacnetValue, PriorityArray, PropertyValue, ValueKind};

// === Device model ===
pub use database::{ObjectDatabase, ObjectEntry};
pub use simulator::{ObjectSpec, SimulatorConfig, VirtualDevice};
pub use trend::{StatusFlags, TrendRecord};

// === Subscriptions ===
pub use subscription::{SubscriptionKey, SubscriptionManager, SubscriptionState};

// === Monitoring ===
pub use transport::{TransportStats, UdpTransport};

// === Protocol limits (commonly needed constants) ===
pub use constants::{DEFAULT_PORT, MAX_APDU_LENGTH, MAX_INSTANCE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
