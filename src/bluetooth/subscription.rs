/// Notification / indication subscription life-cycle
///
/// Idle -> Subscribing -> Subscribed -> Unsubscribing -> Idle. At most one
/// characteristic holds Subscribed at a time; the guard is the state itself,
/// not a lock.
use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::peripheral::{NotificationReceiver, Peripheral, ValueObserver};
use crate::error::GattError;
use crate::models::{CharacteristicDescriptor, ClientConfiguration, SubscriptionState};

#[derive(Debug, Clone)]
struct Registration {
    characteristic: CharacteristicDescriptor,
    configuration: ClientConfiguration,
}

#[derive(Debug)]
pub struct SubscriptionStateMachine {
    state: SubscriptionState,
    registration: Option<Registration>,
    observer: ValueObserver,
}

impl SubscriptionStateMachine {
    /// Create the machine together with the receiving end of its observer
    /// channel. Values for whichever characteristic is subscribed arrive on
    /// the receiver, in order, one per notification.
    pub fn new() -> (Self, NotificationReceiver) {
        let (observer, receiver) = mpsc::unbounded_channel();
        let machine = SubscriptionStateMachine {
            state: SubscriptionState::Idle,
            registration: None,
            observer,
        };
        (machine, receiver)
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn is_subscribed(&self) -> bool {
        self.state == SubscriptionState::Subscribed
    }

    /// The characteristic currently holding the subscription
    pub fn registered(&self) -> Option<&CharacteristicDescriptor> {
        self.registration.as_ref().map(|r| &r.characteristic)
    }

    pub fn registered_uuid(&self) -> Option<Uuid> {
        self.registered().map(|c| c.uuid)
    }

    /// Configuration value written for the current subscription
    pub fn configuration(&self) -> Option<ClientConfiguration> {
        self.registration.as_ref().map(|r| r.configuration)
    }

    /// Enable notifications or indications on `characteristic`
    ///
    /// A subscription held by a different characteristic is torn down first;
    /// if that teardown fails the error is returned and the old subscription
    /// stays in place. A failed descriptor write leaves the machine Idle.
    ///
    /// # Returns
    /// The configuration value that was written
    pub async fn subscribe<P: Peripheral + ?Sized>(
        &mut self,
        peripheral: &P,
        characteristic: &CharacteristicDescriptor,
    ) -> Result<ClientConfiguration, GattError> {
        match self.state {
            SubscriptionState::Idle => {}
            SubscriptionState::Subscribed => {
                let same = self
                    .registered()
                    .map_or(false, |current| current.handle == characteristic.handle);
                if same {
                    return Err(GattError::AlreadyActive);
                }
            }
            SubscriptionState::Subscribing | SubscriptionState::Unsubscribing => {
                return Err(GattError::AlreadyActive);
            }
        }

        // Checked before any teardown so a refusal leaves the old subscription alone
        let configuration = ClientConfiguration::for_properties(&characteristic.properties)
            .ok_or(GattError::SubscriptionUnsupported)?;

        if self.state == SubscriptionState::Subscribed {
            info!("Releasing previous subscription before switching characteristic");
            self.unsubscribe(peripheral).await?;
        }

        self.state = SubscriptionState::Subscribing;
        debug!(
            "Writing CCCD {:#06x} for {}",
            configuration.value(),
            characteristic.uuid
        );

        if let Err(e) = peripheral
            .write_client_configuration(characteristic, configuration)
            .await
        {
            warn!("Error registering for value changes: {}", e);
            self.state = SubscriptionState::Idle;
            return Err(e);
        }

        peripheral.register_observer(characteristic, self.observer.clone());
        self.registration = Some(Registration {
            characteristic: characteristic.clone(),
            configuration,
        });
        self.state = SubscriptionState::Subscribed;
        info!("Measurements started on {}", characteristic.uuid);

        Ok(configuration)
    }

    /// Disable value changes on the subscribed characteristic
    ///
    /// Only a successful descriptor write removes the observer; on failure
    /// the machine stays Subscribed with the observer still registered.
    pub async fn unsubscribe<P: Peripheral + ?Sized>(&mut self, peripheral: &P) -> Result<(), GattError> {
        if self.state != SubscriptionState::Subscribed {
            return Err(GattError::AlreadyInactive);
        }
        let Some(registration) = self.registration.as_ref() else {
            return Err(GattError::AlreadyInactive);
        };
        let characteristic = registration.characteristic.clone();

        self.state = SubscriptionState::Unsubscribing;

        if let Err(e) = peripheral
            .write_client_configuration(&characteristic, ClientConfiguration::None)
            .await
        {
            warn!("Error un-registering for notifications: {}", e);
            self.state = SubscriptionState::Subscribed;
            return Err(e);
        }

        peripheral.deregister_observer(&characteristic);
        self.registration = None;
        self.state = SubscriptionState::Idle;
        info!("Measurements ended on {}", characteristic.uuid);

        Ok(())
    }

    /// Forget the subscription after the link dropped
    ///
    /// Nothing is written; the peripheral is gone. Also recovers a machine
    /// left mid-transition by a cancelled exchange.
    pub fn reset(&mut self) {
        if self.state != SubscriptionState::Idle {
            warn!("Dropping subscription state {:?} after connection loss", self.state);
        }
        self.registration = None;
        self.state = SubscriptionState::Idle;
    }
}
