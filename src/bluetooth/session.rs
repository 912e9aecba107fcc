/// Operations on the currently selected characteristic
use std::sync::Arc;

use log::{debug, warn};

use super::peripheral::Peripheral;
use crate::codec;
use crate::error::GattError;
use crate::models::{
    resolve_presentation_format, Capabilities, CharacteristicDescriptor, PresentationFormat,
    RawAttributeValue,
};
use crate::utils::observation_time;

/// A characteristic bound for read / write / subscribe
///
/// Created fresh on every selection; descriptors are re-queried each time.
pub struct CharacteristicSession<P: ?Sized> {
    peripheral: Arc<P>,
    characteristic: CharacteristicDescriptor,
    presentation_format: Option<PresentationFormat>,
}

impl<P: Peripheral + ?Sized> CharacteristicSession<P> {
    /// Bind to `characteristic`, fetching its presentation formats uncached
    ///
    /// A failed descriptor read is not fatal: the session opens without a
    /// format and the codec falls back to identity-based decoding.
    pub async fn open(peripheral: Arc<P>, mut characteristic: CharacteristicDescriptor) -> Self {
        match peripheral.presentation_formats(&characteristic).await {
            Ok(formats) => characteristic.presentation_formats = formats,
            Err(e) => {
                warn!("Descriptor read failure for {}: {}", characteristic.uuid, e);
                characteristic.presentation_formats.clear();
            }
        }

        let presentation_format = resolve_presentation_format(&characteristic.presentation_formats);
        if characteristic.presentation_formats.len() > 1 {
            debug!(
                "{} declares {} presentation formats, decoding by identity",
                characteristic.uuid,
                characteristic.presentation_formats.len()
            );
        }

        CharacteristicSession {
            peripheral,
            characteristic,
            presentation_format,
        }
    }

    pub fn characteristic(&self) -> &CharacteristicDescriptor {
        &self.characteristic
    }

    /// The single declared presentation format, if exactly one exists
    pub fn presentation_format(&self) -> Option<&PresentationFormat> {
        self.presentation_format.as_ref()
    }

    /// Operations to offer, strictly from this characteristic's properties
    pub fn capabilities(&self) -> Capabilities {
        self.characteristic.properties.capabilities()
    }

    /// Read the current value from the device (never cached)
    pub async fn read(&self) -> Result<RawAttributeValue, GattError> {
        let bytes = self.peripheral.read(&self.characteristic).await?;
        Ok(RawAttributeValue::new(
            self.characteristic.handle,
            self.characteristic.uuid,
            bytes,
            observation_time(),
        ))
    }

    pub async fn write(&self, value: &[u8]) -> Result<(), GattError> {
        self.peripheral.write(&self.characteristic, value).await?;
        debug!("Successfully wrote {} bytes to {}", value.len(), self.characteristic.uuid);
        Ok(())
    }

    /// Write UTF-8 text; empty text is rejected before reaching the device
    pub async fn write_text(&self, text: &str) -> Result<(), GattError> {
        if text.is_empty() {
            return Err(GattError::InvalidInput("No data to write to device".to_string()));
        }
        self.write(&codec::encode_text(text)).await
    }

    /// Write a signed 32-bit integer, little-endian
    pub async fn write_i32(&self, value: i32) -> Result<(), GattError> {
        self.write(&codec::encode_i32(value)).await
    }
}
