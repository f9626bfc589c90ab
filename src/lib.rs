//! BLE heart rate monitor client.
//!
//! Connects to the first peripheral advertising the standard Heart Rate
//! service (0x180D), walks the GATT discovery sequence, subscribes to
//! Heart Rate Measurement notifications and decodes each one into a
//! [`HeartRateReading`].
//!
//! The two interesting pieces are [`coordinator::ConnectionCoordinator`],
//! the connection state machine, and [`measurement::decode`], the
//! characteristic decoder. The platform BLE stack sits behind the
//! [`adapter::BleAdapter`] trait; [`btle::BtleplugAdapter`] is the real
//! backend and tests inject scripted ones.

pub mod adapter;
pub mod btle;
pub mod coordinator;
pub mod error;
pub mod measurement;
pub mod signal;
pub mod uuids;

pub use coordinator::{ConnectionCoordinator, CoordinatorConfig};
pub use error::CoordinatorError;
pub use measurement::{decode, BodySensorLocation, DecodeError, Decoded, HeartRateReading};
pub use signal::{Command, ConnectionStatus, MonitorEvent};
