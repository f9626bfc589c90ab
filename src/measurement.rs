//! Heart Rate Measurement characteristic (0x2A37) decoding.
//!
//! Byte layout per the Bluetooth SIG Heart Rate Service spec: a flags byte
//! followed by BPM (1 or 2 bytes, flag bit 0), optional Energy Expended
//! (2 bytes, flag bit 3) and zero or more RR intervals (2 bytes each,
//! flag bit 4). All multi-byte fields are little-endian.

use thiserror::Error;

const FLAG_BPM_U16: u8 = 1 << 0;
const FLAG_CONTACT_DETECTED: u8 = 1 << 1;
const FLAG_CONTACT_SUPPORTED: u8 = 1 << 2;
const FLAG_ENERGY_EXPENDED: u8 = 1 << 3;
const FLAG_RR_INTERVALS: u8 = 1 << 4;

/// One decoded heart rate notification. Produced fresh per notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartRateReading {
    /// Beats per minute.
    pub bpm: u16,
    /// Accumulated energy in kilojoules, if the sensor reports it.
    pub energy_expended: Option<u16>,
    /// RR intervals in 1/1024 second units, in on-air order.
    pub rr_intervals: Vec<u16>,
    pub sensor_contact_supported: bool,
    /// `None` when the sensor does not support contact detection.
    pub sensor_contact_detected: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The flags byte promised more payload than the buffer holds.
    #[error("measurement too short: need {needed} bytes, got {got}")]
    TooShort { needed: usize, got: usize },
    /// An unpaired byte was left after RR interval parsing. Non-fatal:
    /// the reading built from the paired bytes is still delivered.
    #[error("{0} trailing byte(s) after RR intervals")]
    TrailingBytes(usize),
}

/// A successfully decoded reading, possibly with a non-fatal warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub reading: HeartRateReading,
    pub warning: Option<DecodeError>,
}

/// Decode a raw Heart Rate Measurement value.
///
/// The format-width flag governs the BPM field size on every decode; a
/// fixed-offset read would misreport any rate the sensor encodes as u16.
pub fn decode(value: &[u8]) -> Result<Decoded, DecodeError> {
    let too_short = |needed: usize| DecodeError::TooShort {
        needed,
        got: value.len(),
    };

    let flags = *value.first().ok_or_else(|| too_short(1))?;
    let mut rest = &value[1..];

    let bpm = if flags & FLAG_BPM_U16 != 0 {
        let (raw, tail) = rest.split_first_chunk::<2>().ok_or_else(|| too_short(3))?;
        rest = tail;
        u16::from_le_bytes(*raw)
    } else {
        let (raw, tail) = rest.split_first().ok_or_else(|| too_short(2))?;
        rest = tail;
        u16::from(*raw)
    };

    let sensor_contact_supported = flags & FLAG_CONTACT_SUPPORTED != 0;
    let sensor_contact_detected =
        sensor_contact_supported.then(|| flags & FLAG_CONTACT_DETECTED != 0);

    let energy_expended = if flags & FLAG_ENERGY_EXPENDED != 0 {
        let needed = value.len() - rest.len() + 2;
        let (raw, tail) = rest.split_first_chunk::<2>().ok_or_else(|| too_short(needed))?;
        rest = tail;
        Some(u16::from_le_bytes(*raw))
    } else {
        None
    };

    let mut rr_intervals = Vec::new();
    let mut warning = None;
    if flags & FLAG_RR_INTERVALS != 0 {
        while let Some((raw, tail)) = rest.split_first_chunk::<2>() {
            rr_intervals.push(u16::from_le_bytes(*raw));
            rest = tail;
        }
        if !rest.is_empty() {
            warning = Some(DecodeError::TrailingBytes(rest.len()));
        }
    }

    Ok(Decoded {
        reading: HeartRateReading {
            bpm,
            energy_expended,
            rr_intervals,
            sensor_contact_supported,
            sensor_contact_detected,
        },
        warning,
    })
}

/// Body Sensor Location characteristic (0x2A38) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySensorLocation {
    Other,
    Chest,
    Wrist,
    Finger,
    Hand,
    EarLobe,
    Foot,
    /// Reserved value we do not know; kept verbatim.
    Reserved(u8),
}

impl From<u8> for BodySensorLocation {
    fn from(raw: u8) -> Self {
        match raw {
            0 => BodySensorLocation::Other,
            1 => BodySensorLocation::Chest,
            2 => BodySensorLocation::Wrist,
            3 => BodySensorLocation::Finger,
            4 => BodySensorLocation::Hand,
            5 => BodySensorLocation::EarLobe,
            6 => BodySensorLocation::Foot,
            other => BodySensorLocation::Reserved(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(value: &[u8]) -> HeartRateReading {
        let decoded = decode(value).expect("decode failed");
        assert_eq!(decoded.warning, None);
        decoded.reading
    }

    #[test]
    fn u8_bpm_no_extras() {
        let r = reading(&[0x00, 60]);
        assert_eq!(r.bpm, 60);
        assert_eq!(r.energy_expended, None);
        assert!(r.rr_intervals.is_empty());
        assert!(!r.sensor_contact_supported);
        assert_eq!(r.sensor_contact_detected, None);
    }

    #[test]
    fn u16_bpm_little_endian() {
        assert_eq!(reading(&[0x01, 0x3C, 0x00]).bpm, 60);
        assert_eq!(reading(&[0x01, 0x2C, 0x01]).bpm, 300);
    }

    #[test]
    fn width_flag_governs_bpm_field() {
        // Same payload bytes, different flag: must not read a fixed offset.
        assert_eq!(reading(&[0x00, 0x3C]).bpm, 60);
        assert_eq!(reading(&[0x01, 0x3C, 0x01]).bpm, 0x013C);
    }

    #[test]
    fn energy_expended_present() {
        let r = reading(&[0x08, 60, 0x64, 0x00]);
        assert_eq!(r.bpm, 60);
        assert_eq!(r.energy_expended, Some(100));
    }

    #[test]
    fn rr_intervals_in_order() {
        let r = reading(&[0x11, 0x3C, 0x00, 0x00, 0x04, 0x00, 0x08]);
        assert_eq!(r.bpm, 60);
        assert_eq!(r.rr_intervals, vec![0x0400, 0x0800]);
    }

    #[test]
    fn all_fields_together() {
        let r = reading(&[0x1F, 0x50, 0x00, 0x10, 0x27, 0x00, 0x04]);
        assert_eq!(r.bpm, 80);
        assert_eq!(r.energy_expended, Some(10000));
        assert_eq!(r.rr_intervals, vec![0x0400]);
        assert!(r.sensor_contact_supported);
        assert_eq!(r.sensor_contact_detected, Some(true));
    }

    #[test]
    fn sensor_contact_states() {
        // 00 and 01: feature not supported.
        assert_eq!(reading(&[0x00, 60]).sensor_contact_detected, None);
        let r = reading(&[0x02, 60]);
        assert!(!r.sensor_contact_supported);
        assert_eq!(r.sensor_contact_detected, None);
        // 10: supported, no contact. 11: supported, contact.
        let r = reading(&[0x04, 60]);
        assert!(r.sensor_contact_supported);
        assert_eq!(r.sensor_contact_detected, Some(false));
        assert_eq!(reading(&[0x06, 60]).sensor_contact_detected, Some(true));
    }

    #[test]
    fn empty_buffer_is_too_short() {
        assert_eq!(decode(&[]), Err(DecodeError::TooShort { needed: 1, got: 0 }));
    }

    #[test]
    fn flags_without_bpm_is_too_short() {
        assert_eq!(
            decode(&[0x00]),
            Err(DecodeError::TooShort { needed: 2, got: 1 })
        );
        assert_eq!(
            decode(&[0x01, 0x3C]),
            Err(DecodeError::TooShort { needed: 3, got: 2 })
        );
    }

    #[test]
    fn truncated_energy_is_too_short() {
        assert_eq!(
            decode(&[0x08, 60, 0x64]),
            Err(DecodeError::TooShort { needed: 4, got: 3 })
        );
    }

    #[test]
    fn rr_flag_with_lone_tail_byte_keeps_the_reading() {
        // Flags 0x10: one-byte BPM, RR intervals present. The single tail
        // byte cannot form an interval, so it is reported as trailing and
        // the BPM-only reading is still returned.
        let decoded = decode(&[0x10, 0x3C, 0x00]).expect("decode failed");
        assert_eq!(decoded.reading.bpm, 60);
        assert!(decoded.reading.rr_intervals.is_empty());
        assert_eq!(decoded.warning, Some(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn unpaired_rr_byte_warns_but_still_decodes() {
        let decoded = decode(&[0x10, 0x3C, 0x00, 0x00, 0x04, 0x00, 0x08]).expect("decode failed");
        assert_eq!(decoded.reading.bpm, 60);
        assert_eq!(decoded.reading.rr_intervals, vec![0x0000, 0x0004]);
        assert_eq!(decoded.warning, Some(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn sensor_location_values() {
        assert_eq!(BodySensorLocation::from(1), BodySensorLocation::Chest);
        assert_eq!(BodySensorLocation::from(2), BodySensorLocation::Wrist);
        assert_eq!(BodySensorLocation::from(9), BodySensorLocation::Reserved(9));
    }
}
