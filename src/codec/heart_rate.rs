/// Heart Rate Measurement (0x2A37) payload decoding
use time::OffsetDateTime;

use crate::error::GattError;
use crate::models::{HeartRateMeasurement, RrSample, SensorContact};

// Heart Rate profile flag bits (byte 0)
const HEART_RATE_VALUE_FORMAT_U16: u8 = 0x01;
const SENSOR_CONTACT_DETECTED: u8 = 0x02;
const SENSOR_CONTACT_SUPPORTED: u8 = 0x04;
const ENERGY_EXPENDED_PRESENT: u8 = 0x08;
const RR_INTERVAL_PRESENT: u8 = 0x10;

const MIN_PAYLOAD_LEN: usize = 2;

/// Decode a Heart Rate Measurement payload
///
/// Payload layout:
/// - Byte 0: Flags
/// - Byte 1 (or bytes 1-2 LE when bit0 is set): Heart rate value
/// - 2 bytes LE: Energy Expended, when bit3 is set
/// - N x 2 bytes LE: RR intervals in 1/1024 s, when bit4 is set
///
/// Every RR sample is stamped with `observed_at`; the decoded values depend
/// only on `data`. RR parsing stops as soon as fewer than two bytes remain,
/// so a truncated trailing field is dropped while the heart rate and the
/// samples before it are kept.
///
/// # Arguments
/// * `data` - Raw notification or read value
/// * `observed_at` - When the value was received
///
/// # Returns
/// The decoded measurement, or `MalformedPayload` if the heart rate value
/// itself cannot be read
pub fn parse(data: &[u8], observed_at: OffsetDateTime) -> Result<HeartRateMeasurement, GattError> {
    if data.len() < MIN_PAYLOAD_LEN {
        return Err(GattError::MalformedPayload(format!(
            "heart rate measurement needs at least {} bytes, got {}",
            MIN_PAYLOAD_LEN,
            data.len()
        )));
    }

    let flags = data[0];
    let long_value = flags & HEART_RATE_VALUE_FORMAT_U16 != 0;

    let bpm = if long_value {
        read_u16_le(data, 1).ok_or_else(|| {
            GattError::MalformedPayload("16-bit heart rate value is truncated".to_string())
        })?
    } else {
        u16::from(data[1])
    };

    let sensor_contact = match (
        flags & SENSOR_CONTACT_SUPPORTED != 0,
        flags & SENSOR_CONTACT_DETECTED != 0,
    ) {
        (false, _) => SensorContact::NotSupported,
        (true, false) => SensorContact::NotDetected,
        (true, true) => SensorContact::Detected,
    };

    let mut offset = 1 + if long_value { 2 } else { 1 };

    let energy_expended = if flags & ENERGY_EXPENDED_PRESENT != 0 {
        let energy = read_u16_le(data, offset);
        offset += 2;
        energy
    } else {
        None
    };

    let mut rr_intervals = Vec::new();
    if flags & RR_INTERVAL_PRESENT != 0 {
        while let Some(ticks) = read_u16_le(data, offset) {
            rr_intervals.push(RrSample::from_ticks(ticks, observed_at));
            offset += 2;
        }
    }

    Ok(HeartRateMeasurement {
        bpm,
        sensor_contact,
        energy_expended,
        rr_intervals,
    })
}

/// Bounds-checked little-endian u16 read
fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}
