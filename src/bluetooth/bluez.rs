/// BlueZ-backed peripheral (Linux) built on bluer
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Address, Device, ErrorKind};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use super::peripheral::{Peripheral, PeripheralEvent, ValueObserver};
use crate::error::GattError;
use crate::models::{
    uuids, AttributeHandle, CharacteristicDescriptor, CharacteristicProperties,
    ClientConfiguration, PresentationFormat, RawAttributeValue, ServiceDescriptor,
};
use crate::utils::observation_time;

// Service resolution polling after connect
const SERVICE_RESOLVE_ATTEMPTS: usize = 25;
const WAIT_BETWEEN_ATTEMPTS_MS: u64 = 200;

impl From<bluer::Error> for GattError {
    fn from(err: bluer::Error) -> Self {
        let detail = err.to_string();
        match err.kind {
            ErrorKind::NotAuthorized
            | ErrorKind::AuthenticationFailed
            | ErrorKind::AuthenticationRejected => GattError::AccessDenied(detail),
            ErrorKind::NotPermitted => GattError::WriteNotPermitted(detail),
            ErrorKind::InvalidLength | ErrorKind::InvalidOffset | ErrorKind::InvalidArguments => {
                GattError::InvalidProtocolUnit(detail)
            }
            ErrorKind::NotReady
            | ErrorKind::NotAvailable
            | ErrorKind::DoesNotExist
            | ErrorKind::ConnectionAttemptFailed => GattError::Unreachable(detail),
            _ => GattError::CommunicationFailure(detail),
        }
    }
}

/// Shared slot the forwarding task delivers into
type ObserverSlot = Arc<Mutex<Option<ValueObserver>>>;

struct NotificationSlot {
    observer: ObserverSlot,
    task: JoinHandle<()>,
}

/// A device connected through the system Bluetooth daemon
///
/// BlueZ owns the Client Characteristic Configuration descriptor: enabling
/// maps onto StartNotify (BlueZ picks notify or indicate from the
/// characteristic flags) and disabling onto dropping the notify session.
pub struct BluezPeripheral {
    device: Device,
    address: String,
    notifications: Mutex<HashMap<AttributeHandle, NotificationSlot>>,
}

/// Connect to the peripheral at `address` via the default adapter
///
/// # Arguments
/// * `address` - MAC address, e.g. "AA:BB:CC:DD:EE:FF"
///
/// # Returns
/// The connected peripheral with its GATT services resolved
pub async fn connect(address: &str) -> Result<BluezPeripheral, GattError> {
    let parsed: Address = address
        .parse()
        .map_err(|e| GattError::InvalidInput(format!("invalid device address {}: {}", address, e)))?;

    // Initialize Bluetooth session
    let session = match bluer::Session::new().await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create Bluetooth session: {}", e);
            return Err(e.into());
        }
    };

    // Get the default Bluetooth adapter
    let adapter = match session.default_adapter().await {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Failed to get default Bluetooth adapter: {}", e);
            return Err(GattError::Unreachable(format!("Bluetooth radio is not on: {}", e)));
        }
    };

    // Ensure Bluetooth adapter is powered on
    if let Err(e) = adapter.set_powered(true).await {
        error!("Failed to power on adapter: {}", e);
        return Err(GattError::Unreachable(format!("Bluetooth radio is not on: {}", e)));
    }

    let device = match adapter.device(parsed) {
        Ok(device) => device,
        Err(e) => {
            error!("Failed to connect to device {}: {}", address, e);
            return Err(e.into());
        }
    };

    if !device.is_connected().await? {
        info!("Connecting to {}", address);
        if let Err(e) = device.connect().await {
            error!("Failed to connect to device {}: {}", address, e);
            return Err(e.into());
        }
    }

    wait_for_services(&device, address).await?;

    Ok(BluezPeripheral {
        device,
        address: address.to_uppercase(),
        notifications: Mutex::new(HashMap::new()),
    })
}

async fn wait_for_services(device: &Device, address: &str) -> Result<(), GattError> {
    for attempt in 0..SERVICE_RESOLVE_ATTEMPTS {
        if device.is_services_resolved().await? {
            debug!("Services of {} resolved after {} polls", address, attempt);
            return Ok(());
        }
        sleep(Duration::from_millis(WAIT_BETWEEN_ATTEMPTS_MS)).await;
    }

    Err(GattError::Unreachable(format!(
        "services of {} were not resolved",
        address
    )))
}

/// Run one BlueZ notify session, delivering into whatever observer is
/// registered, until the task is aborted or the device stops sending
///
/// The characteristic is owned by the task so the stream can outlive the
/// caller; whether StartNotify succeeded is reported through `started`.
/// Aborting the task is a deliberate stop. A stream that ends by itself
/// means the link is gone, and the observer is told so.
async fn run_notify_session(
    remote: Characteristic,
    handle: AttributeHandle,
    uuid: Uuid,
    observer: ObserverSlot,
    started: oneshot::Sender<bluer::Result<()>>,
) {
    let stream = match remote.notify().await {
        Ok(stream) => {
            let _ = started.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = started.send(Err(e));
            return;
        }
    };

    let mut stream = Box::pin(stream);
    while let Some(bytes) = stream.next().await {
        let value = RawAttributeValue::new(handle, uuid, bytes, observation_time());
        let sender = observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        match sender {
            Some(sender) => {
                if sender.send(PeripheralEvent::ValueChanged(value)).is_err() {
                    debug!("Notification receiver for {} dropped", uuid);
                }
            }
            None => debug!("No observer registered for {}, value dropped", uuid),
        }
    }

    warn!("Notification stream for {} ended, peripheral unavailable", uuid);
    let sender = observer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(PeripheralEvent::Disconnected);
    }
}

impl BluezPeripheral {
    fn slots(&self) -> MutexGuard<'_, HashMap<AttributeHandle, NotificationSlot>> {
        self.notifications
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn remote_characteristic(&self, handle: AttributeHandle) -> Result<Characteristic, GattError> {
        let service = self.device.service(handle.service).await?;
        Ok(service.characteristic(handle.characteristic).await?)
    }

    async fn start_notify(&self, characteristic: &CharacteristicDescriptor) -> Result<(), GattError> {
        let remote = self.remote_characteristic(characteristic.handle).await?;
        let observer: ObserverSlot = Arc::new(Mutex::new(None));
        let (started_tx, started_rx) = oneshot::channel();

        let task = tokio::spawn(run_notify_session(
            remote,
            characteristic.handle,
            characteristic.uuid,
            Arc::clone(&observer),
            started_tx,
        ));

        match started_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(GattError::CommunicationFailure(format!(
                    "notify session for {} ended before starting",
                    characteristic.uuid
                )))
            }
        }

        if let Some(previous) = self
            .slots()
            .insert(characteristic.handle, NotificationSlot { observer, task })
        {
            previous.task.abort();
        }
        Ok(())
    }

    fn stop_notify(&self, characteristic: &CharacteristicDescriptor) {
        // Dropping the stream inside the task ends the BlueZ notify session
        if let Some(slot) = self.slots().remove(&characteristic.handle) {
            slot.task.abort();
        }
    }
}

#[async_trait]
impl Peripheral for BluezPeripheral {
    fn id(&self) -> &str {
        &self.address
    }

    async fn services(&self) -> Result<Vec<ServiceDescriptor>, GattError> {
        let mut services = Vec::new();
        for service in self.device.services().await? {
            services.push(ServiceDescriptor {
                id: service.id(),
                uuid: service.uuid().await?,
                primary: service.primary().await?,
            });
        }
        Ok(services)
    }

    async fn request_access(&self, service: &ServiceDescriptor) -> Result<(), GattError> {
        // Authorization is negotiated by bluetoothd; only the link is checked here
        if !self.device.is_connected().await? {
            return Err(GattError::Unreachable(format!(
                "{} disconnected before accessing {}",
                self.address, service.uuid
            )));
        }
        Ok(())
    }

    async fn characteristics(
        &self,
        service: &ServiceDescriptor,
    ) -> Result<Vec<CharacteristicDescriptor>, GattError> {
        let remote = self.device.service(service.id).await?;
        let mut characteristics = Vec::new();

        for characteristic in remote.characteristics().await? {
            let flags = characteristic.flags().await?;
            characteristics.push(CharacteristicDescriptor {
                handle: AttributeHandle {
                    service: service.id,
                    characteristic: characteristic.id(),
                },
                uuid: characteristic.uuid().await?,
                properties: CharacteristicProperties {
                    read: flags.read,
                    write: flags.write,
                    write_without_response: flags.write_without_response,
                    notify: flags.notify,
                    indicate: flags.indicate,
                },
                presentation_formats: Vec::new(),
            });
        }

        Ok(characteristics)
    }

    async fn presentation_formats(
        &self,
        characteristic: &CharacteristicDescriptor,
    ) -> Result<Vec<PresentationFormat>, GattError> {
        let remote = self.remote_characteristic(characteristic.handle).await?;
        let mut formats = Vec::new();

        for descriptor in remote.descriptors().await? {
            if descriptor.uuid().await? != uuids::PRESENTATION_FORMAT_DESCRIPTOR {
                continue;
            }
            let raw = descriptor.read().await?;
            match PresentationFormat::from_descriptor(&raw) {
                Ok(format) => formats.push(format),
                Err(e) => warn!("Ignoring presentation format on {}: {}", characteristic.uuid, e),
            }
        }

        Ok(formats)
    }

    async fn read(&self, characteristic: &CharacteristicDescriptor) -> Result<Vec<u8>, GattError> {
        let remote = self.remote_characteristic(characteristic.handle).await?;
        Ok(remote.read().await?)
    }

    async fn write(
        &self,
        characteristic: &CharacteristicDescriptor,
        value: &[u8],
    ) -> Result<(), GattError> {
        let remote = self.remote_characteristic(characteristic.handle).await?;
        Ok(remote.write(value).await?)
    }

    async fn write_client_configuration(
        &self,
        characteristic: &CharacteristicDescriptor,
        value: ClientConfiguration,
    ) -> Result<(), GattError> {
        debug!(
            "CCCD {:#06x} requested for {}",
            value.value(),
            characteristic.uuid
        );
        match value {
            ClientConfiguration::None => {
                self.stop_notify(characteristic);
                Ok(())
            }
            ClientConfiguration::Notify | ClientConfiguration::Indicate => {
                self.start_notify(characteristic).await
            }
        }
    }

    fn register_observer(&self, characteristic: &CharacteristicDescriptor, observer: ValueObserver) {
        match self.slots().get(&characteristic.handle) {
            Some(slot) => {
                *slot
                    .observer
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(observer);
            }
            None => warn!(
                "No notify session for {}, observer not registered",
                characteristic.uuid
            ),
        }
    }

    fn deregister_observer(&self, characteristic: &CharacteristicDescriptor) {
        if let Some(slot) = self.slots().get(&characteristic.handle) {
            *slot
                .observer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        }
    }

    async fn disconnect(&self) -> Result<(), GattError> {
        for (_, slot) in self.slots().drain() {
            slot.task.abort();
        }
        Ok(self.device.disconnect().await?)
    }
}
