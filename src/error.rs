/// Error kinds reported by peripheral operations and decoding
use thiserror::Error;

/// Closed set of failures a caller can match on.
///
/// Peripheral I/O failures abort only the attempted operation; the session
/// and subscription state are left exactly as they were before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GattError {
    /// No connection, or the device / radio is off
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    /// Insufficient permission to a service or characteristic
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The peripheral advertises a capability it does not honor
    #[error("Write not permitted: {0}")]
    WriteNotPermitted(String),

    /// Malformed low-level exchange
    #[error("Invalid protocol data unit: {0}")]
    InvalidProtocolUnit(String),

    /// Any other non-success status from a peripheral operation
    #[error("Communication failure: {0}")]
    CommunicationFailure(String),

    /// A buffer the decoder could not make sense of
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A presentation format or profile the codec does not know
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Characteristic supports neither notifications nor indications")]
    SubscriptionUnsupported,

    #[error("A subscription is already active")]
    AlreadyActive,

    #[error("No subscription is active")]
    AlreadyInactive,

    /// Caller-supplied data rejected before reaching the peripheral
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl GattError {
    /// True for failures that mean the link itself is gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, GattError::Unreachable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = GattError::AccessDenied("Heart Rate".to_string());
        assert_eq!(err.to_string(), "Access denied: Heart Rate");
        assert_eq!(
            GattError::AlreadyInactive.to_string(),
            "No subscription is active"
        );
    }

    #[test]
    fn only_unreachable_counts_as_connection_loss() {
        assert!(GattError::Unreachable("radio off".into()).is_connection_loss());
        assert!(!GattError::CommunicationFailure("busy".into()).is_connection_loss());
    }
}
