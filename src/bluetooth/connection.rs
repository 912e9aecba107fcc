/// Peripheral connection lifetime
use std::sync::Arc;

use log::{debug, error, info, warn};

use super::catalog::ServiceCatalog;
use super::peripheral::{NotificationReceiver, Peripheral, PeripheralEvent};
use super::session::CharacteristicSession;
use super::subscription::SubscriptionStateMachine;
use crate::codec;
use crate::error::GattError;
use crate::export::SampleBuffer;
use crate::models::{
    CharacteristicDescriptor, ClientConfiguration, DecodedMeasurement, RawAttributeValue,
    SubscriptionState,
};

/// Owns the link to one peripheral and its (at most one) subscription
///
/// Any active subscription is torn down before the link is released, both
/// on `disconnect` and when a new peripheral is attached.
pub struct ConnectionManager<P: ?Sized> {
    peripheral: Option<Arc<P>>,
    session: Option<CharacteristicSession<P>>,
    subscription: SubscriptionStateMachine,
}

impl<P: Peripheral + ?Sized> ConnectionManager<P> {
    /// Create an unattached manager and the receiver its notifications
    /// arrive on
    pub fn new() -> (Self, NotificationReceiver) {
        let (subscription, receiver) = SubscriptionStateMachine::new();
        let manager = ConnectionManager {
            peripheral: None,
            session: None,
            subscription,
        };
        (manager, receiver)
    }

    /// Take ownership of a freshly connected peripheral
    ///
    /// The previous peripheral, if any, is disconnected first. When its
    /// subscription cannot be torn down the new one is refused and the old
    /// connection stays as it was.
    pub async fn attach(&mut self, peripheral: Arc<P>) -> Result<(), GattError> {
        if let Err(e) = self.disconnect().await {
            error!("Unable to reset state before connecting: {}", e);
            return Err(e);
        }

        info!("Connected to {}", peripheral.id());
        self.peripheral = Some(peripheral);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.peripheral.is_some()
    }

    fn peripheral(&self) -> Result<&Arc<P>, GattError> {
        self.peripheral
            .as_ref()
            .ok_or_else(|| GattError::Unreachable("no peripheral connected".to_string()))
    }

    pub fn catalog(&self) -> Result<ServiceCatalog<'_, P>, GattError> {
        Ok(ServiceCatalog::new(self.peripheral()?.as_ref()))
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscription.state()
    }

    pub fn session(&self) -> Option<&CharacteristicSession<P>> {
        self.session.as_ref()
    }

    /// Make `characteristic` the active one
    ///
    /// Any notification registration on the previous characteristic is
    /// released before the new session opens. If that release fails the
    /// previous session stays selected.
    pub async fn select_characteristic(
        &mut self,
        characteristic: CharacteristicDescriptor,
    ) -> Result<&CharacteristicSession<P>, GattError> {
        let peripheral = Arc::clone(self.peripheral()?);

        if self.subscription.is_subscribed() {
            self.subscription.unsubscribe(peripheral.as_ref()).await?;
        }
        self.session = None;

        let session = CharacteristicSession::open(peripheral, characteristic).await;
        debug!(
            "Selected {} with capabilities {:?}",
            session.characteristic().uuid,
            session.capabilities()
        );
        let session: &CharacteristicSession<P> = self.session.insert(session);
        Ok(session)
    }

    fn selected(&self) -> Result<&CharacteristicSession<P>, GattError> {
        self.session
            .as_ref()
            .ok_or_else(|| GattError::InvalidInput("no characteristic selected".to_string()))
    }

    /// Subscribe to the selected characteristic
    pub async fn subscribe(&mut self) -> Result<ClientConfiguration, GattError> {
        let peripheral = Arc::clone(self.peripheral()?);
        let characteristic = self.selected()?.characteristic().clone();
        self.subscription
            .subscribe(peripheral.as_ref(), &characteristic)
            .await
    }

    pub async fn unsubscribe(&mut self) -> Result<(), GattError> {
        let peripheral = Arc::clone(self.peripheral()?);
        self.subscription.unsubscribe(peripheral.as_ref()).await
    }

    /// Decode a value read from or pushed by a characteristic
    ///
    /// The selected session's presentation format applies only to values
    /// that came from that same characteristic.
    pub fn decode(&self, value: &RawAttributeValue) -> DecodedMeasurement {
        let format = self
            .session
            .as_ref()
            .filter(|s| s.characteristic().handle == value.handle())
            .and_then(|s| s.presentation_format());
        codec::decode(value, format, self.subscription.registered_uuid())
    }

    /// Handle one value-changed event
    ///
    /// Decodes the value and, while subscribed, appends any RR samples to
    /// `samples`.
    pub fn record(&self, value: &RawAttributeValue, samples: &SampleBuffer) -> DecodedMeasurement {
        let measurement = self.decode(value);
        if self.subscription.is_subscribed() {
            samples.append(measurement.rr_intervals());
        }
        measurement
    }

    /// Dispatch one event from the notification channel
    ///
    /// Values are decoded and recorded. A disconnect resets the connection
    /// and yields `None`; nothing more will arrive for this peripheral.
    pub fn handle_event(
        &mut self,
        event: PeripheralEvent,
        samples: &SampleBuffer,
    ) -> Option<DecodedMeasurement> {
        match event {
            PeripheralEvent::ValueChanged(value) => Some(self.record(&value, samples)),
            PeripheralEvent::Disconnected => {
                self.connection_lost();
                None
            }
        }
    }

    /// Forget the peripheral after the link dropped on its own
    pub fn connection_lost(&mut self) {
        warn!("Connection lost");
        self.subscription.reset();
        self.session = None;
        self.peripheral = None;
    }

    /// Release the peripheral, tearing the subscription down first
    ///
    /// If the subscription cannot be removed the connection is kept and the
    /// error returned; disconnecting with nothing attached is a no-op.
    pub async fn disconnect(&mut self) -> Result<(), GattError> {
        let Some(peripheral) = self.peripheral.clone() else {
            return Ok(());
        };

        if self.subscription.is_subscribed() {
            self.subscription.unsubscribe(peripheral.as_ref()).await?;
        }

        self.session = None;
        self.peripheral = None;

        if let Err(e) = peripheral.disconnect().await {
            // The handle is released regardless; the stack cleans up the link
            warn!("Disconnect from {} reported: {}", peripheral.id(), e);
        }
        info!("Disconnected from {}", peripheral.id());
        Ok(())
    }
}
