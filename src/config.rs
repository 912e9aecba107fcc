use std::env;
use std::path::PathBuf;

use log::{debug, info};
use uuid::Uuid;

use crate::export::DEFAULT_EXPORT_FILE;
use crate::models::uuids;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub device_address: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub export_path: PathBuf,
}

impl ClientConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source
    ///
    /// Recognised keys:
    /// - `BLE_DEVICE_ADDRESS` (required)
    /// - `BLE_SERVICE_UUID` (default: Heart Rate service)
    /// - `BLE_CHARACTERISTIC_UUID` (default: Heart Rate Measurement)
    /// - `RR_EXPORT_PATH` (default: RRintervals_1.csv)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let device_address = lookup("BLE_DEVICE_ADDRESS")
            .map(|a| a.trim().to_uppercase())
            .filter(|a| !a.is_empty())
            .ok_or("BLE_DEVICE_ADDRESS environment variable not set")?;

        let service_uuid = match lookup("BLE_SERVICE_UUID") {
            Some(value) => parse_uuid(&value)?,
            None => uuids::HEART_RATE_SERVICE,
        };

        let characteristic_uuid = match lookup("BLE_CHARACTERISTIC_UUID") {
            Some(value) => parse_uuid(&value)?,
            None => uuids::HEART_RATE_MEASUREMENT,
        };

        let export_path = lookup("RR_EXPORT_PATH")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_EXPORT_FILE.to_string())
            .into();

        let config = ClientConfig {
            device_address,
            service_uuid,
            characteristic_uuid,
            export_path,
        };

        info!("Target device: {}", config.device_address);
        debug!(
            "Service {}, characteristic {}, export to {}",
            config.service_uuid,
            config.characteristic_uuid,
            config.export_path.display()
        );

        Ok(config)
    }
}

/// Parse a full 128-bit UUID or a 16-bit assigned number ("2A37", "0x2A37")
pub fn parse_uuid(value: &str) -> Result<Uuid, Box<dyn std::error::Error>> {
    let value = value.trim();
    let short = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);

    if short.len() == 4 {
        let number = u16::from_str_radix(short, 16)
            .map_err(|e| format!("Invalid 16-bit UUID '{}': {}", value, e))?;
        return Ok(uuids::from_short(number));
    }

    Uuid::parse_str(value).map_err(|e| format!("Invalid UUID '{}': {}", value, e).into())
}
