/// Transport seam between the session logic and a concrete GATT stack
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::GattError;
use crate::models::{
    CharacteristicDescriptor, ClientConfiguration, PresentationFormat, RawAttributeValue,
    ServiceDescriptor,
};

/// What a transport delivers to a registered observer
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    /// A notification or indication carrying the new value
    ValueChanged(RawAttributeValue),
    /// The link dropped; nothing more arrives for this registration
    Disconnected,
}

/// Sending half of the single-consumer value-changed channel
pub type ValueObserver = mpsc::UnboundedSender<PeripheralEvent>;

/// Receiving half, owned by whoever presents decoded values
pub type NotificationReceiver = mpsc::UnboundedReceiver<PeripheralEvent>;

/// A connected GATT peripheral
///
/// Every async operation is a single request/response exchange with the
/// device. None of them cache: each call re-queries the peripheral. Dropping
/// a returned future abandons the exchange, which is how callers cancel on
/// connection loss.
#[async_trait]
pub trait Peripheral: Send + Sync {
    /// Stable identity of the device (its address for BlueZ)
    fn id(&self) -> &str;

    async fn services(&self) -> Result<Vec<ServiceDescriptor>, GattError>;

    /// Ask for access to a service before touching its characteristics
    async fn request_access(&self, service: &ServiceDescriptor) -> Result<(), GattError>;

    async fn characteristics(
        &self,
        service: &ServiceDescriptor,
    ) -> Result<Vec<CharacteristicDescriptor>, GattError>;

    /// Presentation Format descriptors declared on a characteristic
    async fn presentation_formats(
        &self,
        characteristic: &CharacteristicDescriptor,
    ) -> Result<Vec<PresentationFormat>, GattError>;

    async fn read(&self, characteristic: &CharacteristicDescriptor) -> Result<Vec<u8>, GattError>;

    async fn write(
        &self,
        characteristic: &CharacteristicDescriptor,
        value: &[u8],
    ) -> Result<(), GattError>;

    /// Write the Client Characteristic Configuration descriptor
    async fn write_client_configuration(
        &self,
        characteristic: &CharacteristicDescriptor,
        value: ClientConfiguration,
    ) -> Result<(), GattError>;

    /// Route value-changed events for `characteristic` to `observer`
    ///
    /// If the link drops while registered, the transport sends
    /// `PeripheralEvent::Disconnected` before releasing the observer.
    fn register_observer(&self, characteristic: &CharacteristicDescriptor, observer: ValueObserver);

    fn deregister_observer(&self, characteristic: &CharacteristicDescriptor);

    /// Release the link to the device
    async fn disconnect(&self) -> Result<(), GattError>;
}
