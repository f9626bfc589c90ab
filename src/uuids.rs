//! Bluetooth SIG assigned numbers for the Heart Rate service.
//!
//! https://www.bluetooth.com/specifications/assigned-numbers/

use btleplug::api::bleuuid::uuid_from_u16;
use uuid::Uuid;

/// Heart Rate service (0x180D).
pub const HEART_RATE_SERVICE: Uuid = uuid_from_u16(0x180D);

/// Heart Rate Measurement characteristic (0x2A37), notify-only.
pub const HEART_RATE_MEASUREMENT: Uuid = uuid_from_u16(0x2A37);

/// Body Sensor Location characteristic (0x2A38), read-only.
pub const BODY_SENSOR_LOCATION: Uuid = uuid_from_u16(0x2A38);

/// Heart Rate Control Point characteristic (0x2A39), write-only.
pub const HEART_RATE_CONTROL_POINT: Uuid = uuid_from_u16(0x2A39);

/// Control point command that resets the accumulated Energy Expended value.
pub const RESET_ENERGY_EXPENDED: u8 = 0x01;
