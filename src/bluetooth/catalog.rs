/// Service and characteristic enumeration
use log::{error, info};

use super::peripheral::Peripheral;
use crate::error::GattError;
use crate::models::{CharacteristicDescriptor, ServiceDescriptor};

/// Uncached discovery over one connected peripheral
///
/// A failed enumeration yields an error and no list at all, never a partial
/// list presented as complete.
pub struct ServiceCatalog<'a, P: ?Sized> {
    peripheral: &'a P,
}

impl<'a, P: Peripheral + ?Sized> ServiceCatalog<'a, P> {
    pub fn new(peripheral: &'a P) -> Self {
        ServiceCatalog { peripheral }
    }

    pub async fn discover_services(&self) -> Result<Vec<ServiceDescriptor>, GattError> {
        match self.peripheral.services().await {
            Ok(services) => {
                info!("Found {} services on {}", services.len(), self.peripheral.id());
                Ok(services)
            }
            Err(e) => {
                error!("Device unreachable: {}", e);
                Err(e)
            }
        }
    }

    /// Enumerate the characteristics of `service`
    ///
    /// Access to the service is requested first; a refusal is reported the
    /// same way as a failed enumeration.
    pub async fn discover_characteristics(
        &self,
        service: &ServiceDescriptor,
    ) -> Result<Vec<CharacteristicDescriptor>, GattError> {
        if let Err(e) = self.peripheral.request_access(service).await {
            error!("Error accessing service {}: {}", service.uuid, e);
            return Err(e);
        }

        match self.peripheral.characteristics(service).await {
            Ok(characteristics) => {
                info!(
                    "Found {} characteristics in service {}",
                    characteristics.len(),
                    service.uuid
                );
                Ok(characteristics)
            }
            Err(e) => {
                error!("Error accessing service {}: {}", service.uuid, e);
                Err(e)
            }
        }
    }
}
