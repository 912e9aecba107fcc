/// In-memory peripheral for exercising the session logic without a radio
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::peripheral::{NotificationReceiver, Peripheral, PeripheralEvent, ValueObserver};
use crate::error::GattError;
use crate::models::{
    AttributeHandle, CharacteristicDescriptor, CharacteristicProperties, ClientConfiguration,
    PresentationFormat, RawAttributeValue, ServiceDescriptor,
};

/// Everything the fake records, plus knobs to make operations fail
#[derive(Default)]
pub struct FakeState {
    pub cccd_writes: Vec<(AttributeHandle, ClientConfiguration)>,
    pub writes: Vec<(AttributeHandle, Vec<u8>)>,
    pub observers: HashMap<AttributeHandle, ValueObserver>,
    pub reads: usize,
    pub disconnected: bool,
    /// Every CCCD write fails with this while set
    pub fail_cccd: Option<GattError>,
    pub fail_services: Option<GattError>,
    pub fail_characteristics: Option<GattError>,
    pub fail_formats: Option<GattError>,
    pub fail_writes: Option<GattError>,
    pub denied_services: Vec<u16>,
}

pub struct FakePeripheral {
    id: String,
    services: Vec<ServiceDescriptor>,
    characteristics: HashMap<u16, Vec<CharacteristicDescriptor>>,
    formats: HashMap<AttributeHandle, Vec<PresentationFormat>>,
    values: HashMap<AttributeHandle, Vec<u8>>,
    state: Mutex<FakeState>,
}

impl FakePeripheral {
    pub fn new(id: &str) -> Self {
        FakePeripheral {
            id: id.to_string(),
            services: Vec::new(),
            characteristics: HashMap::new(),
            formats: HashMap::new(),
            values: HashMap::new(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_service(
        mut self,
        service: ServiceDescriptor,
        characteristics: Vec<CharacteristicDescriptor>,
    ) -> Self {
        self.characteristics.insert(service.id, characteristics);
        self.services.push(service);
        self
    }

    pub fn with_formats(mut self, handle: AttributeHandle, formats: Vec<PresentationFormat>) -> Self {
        self.formats.insert(handle, formats);
        self
    }

    pub fn with_value(mut self, handle: AttributeHandle, value: &[u8]) -> Self {
        self.values.insert(handle, value.to_vec());
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Push a value-changed event the way the radio would
    ///
    /// Returns false when nobody is registered for the characteristic.
    pub fn notify(&self, characteristic: &CharacteristicDescriptor, bytes: &[u8]) -> bool {
        let state = self.state();
        match state.observers.get(&characteristic.handle) {
            Some(observer) => observer
                .send(PeripheralEvent::ValueChanged(RawAttributeValue::new(
                    characteristic.handle,
                    characteristic.uuid,
                    bytes.to_vec(),
                    OffsetDateTime::UNIX_EPOCH,
                )))
                .is_ok(),
            None => false,
        }
    }

    /// Drop the link as a radio would: every open notify stream ends and
    /// its observer hears about it
    pub fn drop_link(&self) {
        let mut state = self.state();
        state.disconnected = true;
        for (_, observer) in state.observers.drain() {
            let _ = observer.send(PeripheralEvent::Disconnected);
        }
    }

    fn ensure_connected(&self) -> Result<(), GattError> {
        if self.state().disconnected {
            return Err(GattError::Unreachable(self.id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Peripheral for FakePeripheral {
    fn id(&self) -> &str {
        &self.id
    }

    async fn services(&self) -> Result<Vec<ServiceDescriptor>, GattError> {
        self.ensure_connected()?;
        if let Some(e) = self.state().fail_services.clone() {
            return Err(e);
        }
        Ok(self.services.clone())
    }

    async fn request_access(&self, service: &ServiceDescriptor) -> Result<(), GattError> {
        if self.state().denied_services.contains(&service.id) {
            return Err(GattError::AccessDenied(service.uuid.to_string()));
        }
        Ok(())
    }

    async fn characteristics(
        &self,
        service: &ServiceDescriptor,
    ) -> Result<Vec<CharacteristicDescriptor>, GattError> {
        self.ensure_connected()?;
        if let Some(e) = self.state().fail_characteristics.clone() {
            return Err(e);
        }
        Ok(self.characteristics.get(&service.id).cloned().unwrap_or_default())
    }

    async fn presentation_formats(
        &self,
        characteristic: &CharacteristicDescriptor,
    ) -> Result<Vec<PresentationFormat>, GattError> {
        if let Some(e) = self.state().fail_formats.clone() {
            return Err(e);
        }
        Ok(self.formats.get(&characteristic.handle).cloned().unwrap_or_default())
    }

    async fn read(&self, characteristic: &CharacteristicDescriptor) -> Result<Vec<u8>, GattError> {
        self.ensure_connected()?;
        self.state().reads += 1;
        Ok(self.values.get(&characteristic.handle).cloned().unwrap_or_default())
    }

    async fn write(
        &self,
        characteristic: &CharacteristicDescriptor,
        value: &[u8],
    ) -> Result<(), GattError> {
        self.ensure_connected()?;
        let mut state = self.state();
        if let Some(e) = state.fail_writes.clone() {
            return Err(e);
        }
        state.writes.push((characteristic.handle, value.to_vec()));
        Ok(())
    }

    async fn write_client_configuration(
        &self,
        characteristic: &CharacteristicDescriptor,
        value: ClientConfiguration,
    ) -> Result<(), GattError> {
        self.ensure_connected()?;
        let mut state = self.state();
        if let Some(e) = state.fail_cccd.clone() {
            return Err(e);
        }
        state.cccd_writes.push((characteristic.handle, value));
        Ok(())
    }

    fn register_observer(&self, characteristic: &CharacteristicDescriptor, observer: ValueObserver) {
        self.state().observers.insert(characteristic.handle, observer);
    }

    fn deregister_observer(&self, characteristic: &CharacteristicDescriptor) {
        self.state().observers.remove(&characteristic.handle);
    }

    async fn disconnect(&self) -> Result<(), GattError> {
        self.state().disconnected = true;
        Ok(())
    }
}

pub fn service(id: u16, uuid: Uuid) -> ServiceDescriptor {
    ServiceDescriptor {
        id,
        uuid,
        primary: true,
    }
}

pub fn characteristic(
    service: u16,
    id: u16,
    uuid: Uuid,
    properties: CharacteristicProperties,
) -> CharacteristicDescriptor {
    CharacteristicDescriptor {
        handle: AttributeHandle {
            service,
            characteristic: id,
        },
        uuid,
        properties,
        presentation_formats: Vec::new(),
    }
}

pub fn notifiable() -> CharacteristicProperties {
    CharacteristicProperties {
        read: true,
        notify: true,
        ..Default::default()
    }
}

/// Next value-changed event, failing the test on anything else
pub async fn next_value(rx: &mut NotificationReceiver) -> RawAttributeValue {
    match rx.recv().await {
        Some(PeripheralEvent::ValueChanged(value)) => value,
        other => panic!("expected a value, got {:?}", other),
    }
}
