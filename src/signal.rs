//! Channel signals between the coordinator and its consumer.

use crate::error::CoordinatorError;
use crate::measurement::{BodySensorLocation, DecodeError, HeartRateReading};

/// Control commands accepted by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Begin the scan → connect → subscribe cycle. Ignored while running.
    Start,
    /// Cancel whatever is in flight, disconnect, settle in `Idle`.
    /// Idempotent.
    Stop,
}

/// Coarse connection status delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Scanning,
    /// Subscribed and delivering readings.
    Connected,
    Disconnected,
    Error(CoordinatorError),
}

/// Everything the coordinator emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Reading(HeartRateReading),
    /// Where the sensor sits on the body; informational one-shot.
    SensorLocation(BodySensorLocation),
    Status(ConnectionStatus),
    /// A notification that could not be (fully) decoded. The subscription
    /// keeps running.
    DecodeFailed(DecodeError),
}
