use std::fmt;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::GattError;
use crate::utils::hex_string;

/// Well-known attribute identifiers
pub mod uuids {
    use uuid::Uuid;

    // Bluetooth Base UUID, 16-bit assigned numbers live in bits 96..112
    const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

    /// Expand a 16-bit assigned number into its full 128-bit form.
    pub const fn from_short(short: u16) -> Uuid {
        Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
    }

    pub const HEART_RATE_SERVICE: Uuid = from_short(0x180D);
    pub const HEART_RATE_MEASUREMENT: Uuid = from_short(0x2A37);
    pub const BATTERY_LEVEL: Uuid = from_short(0x2A19);
    pub const PRESENTATION_FORMAT_DESCRIPTOR: Uuid = from_short(0x2904);

    /// Result characteristic of the custom calculator service
    pub const RESULT_CHARACTERISTIC: Uuid =
        Uuid::from_u128(0xcaec2ebc_e1d9_11e6_bf01_fe55135034f4);
}

/// Addresses one characteristic on a connected peripheral.
///
/// UUIDs may repeat across services, so the service and characteristic
/// ids assigned by the host stack are used instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeHandle {
    pub service: u16,
    pub characteristic: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub id: u16,
    pub uuid: Uuid,
    pub primary: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// Which operations a caller may offer for the selected characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
    pub subscribe: bool,
}

impl CharacteristicProperties {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            read: self.read,
            write: self.write || self.write_without_response,
            subscribe: self.notify || self.indicate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub handle: AttributeHandle,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub presentation_formats: Vec<PresentationFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatType {
    UInt32,
    Utf8,
    Other(u8),
}

impl From<u8> for FormatType {
    fn from(value: u8) -> Self {
        match value {
            0x08 => FormatType::UInt32,
            0x19 => FormatType::Utf8,
            other => FormatType::Other(other),
        }
    }
}

/// Characteristic Presentation Format descriptor (0x2904)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationFormat {
    pub format: FormatType,
    pub exponent: i8,
    pub unit: u16,
    pub namespace: u8,
    pub description: u16,
}

impl PresentationFormat {
    const DESCRIPTOR_LEN: usize = 7;

    /// Parse the raw descriptor value
    ///
    /// Layout: format (1), exponent (1, signed), unit (2, LE),
    /// namespace (1), description (2, LE).
    pub fn from_descriptor(data: &[u8]) -> Result<Self, GattError> {
        if data.len() < Self::DESCRIPTOR_LEN {
            return Err(GattError::MalformedPayload(format!(
                "presentation format descriptor needs {} bytes, got {}",
                Self::DESCRIPTOR_LEN,
                data.len()
            )));
        }

        Ok(PresentationFormat {
            format: FormatType::from(data[0]),
            exponent: data[1] as i8,
            unit: u16::from_le_bytes([data[2], data[3]]),
            namespace: data[4],
            description: u16::from_le_bytes([data[5], data[6]]),
        })
    }
}

/// Pick the format the codec should use.
///
/// Only an unambiguous single declaration is honored; with zero or several
/// formats the codec falls back to identity-based decoding.
pub fn resolve_presentation_format(formats: &[PresentationFormat]) -> Option<PresentationFormat> {
    match formats {
        [only] => Some(*only),
        _ => None,
    }
}

/// Client Characteristic Configuration descriptor values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientConfiguration {
    None,
    Notify,
    Indicate,
}

impl ClientConfiguration {
    pub fn value(self) -> u16 {
        match self {
            ClientConfiguration::None => 0x0000,
            ClientConfiguration::Notify => 0x0001,
            ClientConfiguration::Indicate => 0x0002,
        }
    }

    /// Indicate wins over notify when a characteristic offers both.
    pub fn for_properties(properties: &CharacteristicProperties) -> Option<Self> {
        if properties.indicate {
            Some(ClientConfiguration::Indicate)
        } else if properties.notify {
            Some(ClientConfiguration::Notify)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Subscribing,
    Subscribed,
    Unsubscribing,
}

/// Bytes received from a characteristic, with where and when they came from
#[derive(Debug, Clone, PartialEq)]
pub struct RawAttributeValue {
    handle: AttributeHandle,
    characteristic: Uuid,
    bytes: Vec<u8>,
    observed_at: OffsetDateTime,
}

impl RawAttributeValue {
    pub fn new(
        handle: AttributeHandle,
        characteristic: Uuid,
        bytes: Vec<u8>,
        observed_at: OffsetDateTime,
    ) -> Self {
        RawAttributeValue {
            handle,
            characteristic,
            bytes,
            observed_at,
        }
    }

    pub fn handle(&self) -> AttributeHandle {
        self.handle
    }

    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn observed_at(&self) -> OffsetDateTime {
        self.observed_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RrSample {
    pub interval_ms: f64,
    pub captured_at: OffsetDateTime,
}

impl RrSample {
    const TICKS_PER_SECOND: f64 = 1024.0;

    /// Convert a raw RR field (1/1024 s ticks) into milliseconds
    pub fn from_ticks(ticks: u16, captured_at: OffsetDateTime) -> Self {
        RrSample {
            interval_ms: f64::from(ticks) / Self::TICKS_PER_SECOND * 1000.0,
            captured_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorContact {
    NotSupported,
    NotDetected,
    Detected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartRateMeasurement {
    pub bpm: u16,
    pub sensor_contact: SensorContact,
    /// Kilojoules, when the energy field is present
    pub energy_expended: Option<u16>,
    pub rr_intervals: Vec<RrSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMeasurement {
    Integer32(u32),
    Utf8Text(String),
    HeartRate(HeartRateMeasurement),
    BatteryPercent(u8),
    CustomInteger(i32),
    RawHex(String),
    Unsupported(GattError),
    Malformed(GattError),
    Empty,
}

impl DecodedMeasurement {
    /// RR samples carried by this measurement, if any
    pub fn rr_intervals(&self) -> &[RrSample] {
        match self {
            DecodedMeasurement::HeartRate(hr) => &hr.rr_intervals,
            _ => &[],
        }
    }
}

impl fmt::Display for DecodedMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedMeasurement::Integer32(value) => write!(f, "{}", value),
            DecodedMeasurement::CustomInteger(value) => write!(f, "{}", value),
            DecodedMeasurement::Utf8Text(text) => write!(f, "{}", text),
            DecodedMeasurement::HeartRate(hr) => {
                write!(f, "Heart Rate: {} beats/minute", hr.bpm)?;
                if let Some(last) = hr.rr_intervals.last() {
                    write!(f, ", RR interval length: {} ms", last.interval_ms)?;
                }
                Ok(())
            }
            DecodedMeasurement::BatteryPercent(level) => write!(f, "Battery Level: {}%", level),
            DecodedMeasurement::RawHex(hex) => write!(f, "Unsupported format: {}", hex),
            DecodedMeasurement::Unsupported(err) => write!(f, "(error: {})", err),
            DecodedMeasurement::Malformed(err) => write!(f, "(unable to parse: {})", err),
            DecodedMeasurement::Empty => write!(f, "Empty data received"),
        }
    }
}

/// Hex rendering used for formats the codec does not interpret
pub fn raw_hex(data: &[u8]) -> DecodedMeasurement {
    DecodedMeasurement::RawHex(hex_string(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uuids_expand_onto_base() {
        assert_eq!(
            uuids::HEART_RATE_MEASUREMENT.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            uuids::RESULT_CHARACTERISTIC.to_string(),
            "caec2ebc-e1d9-11e6-bf01-fe55135034f4"
        );
    }

    #[test]
    fn indicate_preferred_over_notify() {
        let both = CharacteristicProperties {
            notify: true,
            indicate: true,
            ..Default::default()
        };
        assert_eq!(
            ClientConfiguration::for_properties(&both),
            Some(ClientConfiguration::Indicate)
        );

        let notify_only = CharacteristicProperties {
            notify: true,
            ..Default::default()
        };
        assert_eq!(
            ClientConfiguration::for_properties(&notify_only),
            Some(ClientConfiguration::Notify)
        );

        let read_only = CharacteristicProperties {
            read: true,
            ..Default::default()
        };
        assert_eq!(ClientConfiguration::for_properties(&read_only), None);
    }

    #[test]
    fn configuration_values_are_exclusive() {
        assert_eq!(ClientConfiguration::None.value(), 0x0000);
        assert_eq!(ClientConfiguration::Notify.value(), 0x0001);
        assert_eq!(ClientConfiguration::Indicate.value(), 0x0002);
    }

    #[test]
    fn capabilities_follow_properties() {
        let props = CharacteristicProperties {
            write_without_response: true,
            notify: true,
            ..Default::default()
        };
        assert_eq!(
            props.capabilities(),
            Capabilities {
                read: false,
                write: true,
                subscribe: true,
            }
        );
    }

    #[test]
    fn presentation_format_descriptor_parses() {
        // uint32, exponent -2, unit 0x2700 (unitless), namespace 1, description 0
        let format = PresentationFormat::from_descriptor(&[0x08, 0xFE, 0x00, 0x27, 0x01, 0x00, 0x00])
            .unwrap();
        assert_eq!(format.format, FormatType::UInt32);
        assert_eq!(format.exponent, -2);
        assert_eq!(format.unit, 0x2700);
        assert_eq!(format.namespace, 1);

        assert!(matches!(
            PresentationFormat::from_descriptor(&[0x19, 0x00]),
            Err(GattError::MalformedPayload(_))
        ));
    }

    #[test]
    fn format_only_resolved_when_single() {
        let utf8 = PresentationFormat::from_descriptor(&[0x19, 0, 0, 0, 0, 0, 0]).unwrap();
        let uint = PresentationFormat::from_descriptor(&[0x08, 0, 0, 0, 0, 0, 0]).unwrap();

        assert_eq!(resolve_presentation_format(&[]), None);
        assert_eq!(resolve_presentation_format(&[utf8]), Some(utf8));
        assert_eq!(resolve_presentation_format(&[utf8, uint]), None);
    }

    #[test]
    fn heart_rate_display_mentions_latest_interval() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let measurement = DecodedMeasurement::HeartRate(HeartRateMeasurement {
            bpm: 75,
            sensor_contact: SensorContact::NotSupported,
            energy_expended: None,
            rr_intervals: vec![RrSample::from_ticks(1000, now)],
        });
        assert_eq!(
            measurement.to_string(),
            "Heart Rate: 75 beats/minute, RR interval length: 976.5625 ms"
        );
        assert_eq!(DecodedMeasurement::Empty.to_string(), "Empty data received");
    }
}
