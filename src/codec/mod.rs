//! Attribute value decoding
//!
//! Decoding is a fallback chain: an explicit presentation format wins, then
//! the characteristic's profile identity, then best-effort UTF-8 text.
//! Nothing here fails hard; every outcome is a `DecodedMeasurement` the
//! caller can display.

pub mod heart_rate;

use log::debug;
use uuid::Uuid;

use crate::error::GattError;
use crate::models::{
    raw_hex, uuids, DecodedMeasurement, FormatType, PresentationFormat, RawAttributeValue,
};

/// Decode a received value into a typed measurement
///
/// # Arguments
/// * `value` - Raw bytes plus the characteristic they came from
/// * `format` - The single declared presentation format, if any
/// * `registered` - UUID of the characteristic currently subscribed, if any
pub fn decode(
    value: &RawAttributeValue,
    format: Option<&PresentationFormat>,
    registered: Option<Uuid>,
) -> DecodedMeasurement {
    let data = value.bytes();

    if data.is_empty() {
        return DecodedMeasurement::Empty;
    }

    match format {
        Some(format) => decode_with_format(data, format),
        None => decode_by_identity(value, registered),
    }
}

fn decode_with_format(data: &[u8], format: &PresentationFormat) -> DecodedMeasurement {
    match format.format {
        FormatType::UInt32 if data.len() >= 4 => {
            DecodedMeasurement::Integer32(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
        }
        FormatType::Utf8 => match std::str::from_utf8(data) {
            Ok(text) => DecodedMeasurement::Utf8Text(text.to_string()),
            Err(_) => unsupported("invalid utf-8"),
        },
        // Other formats (and a short uint32) are shown as hex
        _ => raw_hex(data),
    }
}

fn decode_by_identity(value: &RawAttributeValue, registered: Option<Uuid>) -> DecodedMeasurement {
    let data = value.bytes();
    let characteristic = value.characteristic();

    if characteristic == uuids::HEART_RATE_MEASUREMENT {
        return match heart_rate::parse(data, value.observed_at()) {
            Ok(measurement) => DecodedMeasurement::HeartRate(measurement),
            Err(e) => {
                debug!("Heart rate payload rejected: {}", e);
                DecodedMeasurement::Malformed(e)
            }
        };
    }

    if characteristic == uuids::BATTERY_LEVEL {
        // Percentage in the first byte
        return DecodedMeasurement::BatteryPercent(data[0]);
    }

    if characteristic == uuids::RESULT_CHARACTERISTIC
        || registered == Some(uuids::RESULT_CHARACTERISTIC)
    {
        return decode_custom_integer(data);
    }

    match std::str::from_utf8(data) {
        Ok(text) => DecodedMeasurement::Utf8Text(text.to_string()),
        Err(_) => unsupported("unknown format"),
    }
}

fn decode_custom_integer(data: &[u8]) -> DecodedMeasurement {
    match data.get(..4) {
        Some(bytes) => {
            DecodedMeasurement::CustomInteger(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        None => DecodedMeasurement::Malformed(GattError::MalformedPayload(format!(
            "integer result needs 4 bytes, got {}",
            data.len()
        ))),
    }
}

fn unsupported(reason: &str) -> DecodedMeasurement {
    DecodedMeasurement::Unsupported(GattError::UnsupportedFormat(reason.to_string()))
}

/// Payload for writing a signed 32-bit integer (little-endian)
pub fn encode_i32(value: i32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Payload for writing text (UTF-8)
pub fn encode_text(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}
