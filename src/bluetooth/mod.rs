pub mod bluez;
pub mod catalog;
pub mod connection;
pub mod peripheral;
pub mod session;
pub mod subscription;

#[cfg(test)]
pub(crate) mod fake;

pub use catalog::ServiceCatalog;
pub use connection::ConnectionManager;
pub use peripheral::{NotificationReceiver, Peripheral, PeripheralEvent, ValueObserver};
pub use session::CharacteristicSession;
pub use subscription::SubscriptionStateMachine;
