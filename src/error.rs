//! Error handling for the BACnet library
//!
//! Every public operation returns exactly one variant from this taxonomy;
//! validation errors are raised locally before any network I/O, transport
//! failures are reported to the immediate caller without automatic retry.

use thiserror::Error;

/// BACnet library error type
#[derive(Error, Debug, Clone)]
pub enum BacnetError {
    /// Malformed network address (bad octet, port, or shape)
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Object type outside the closed set or instance outside 0..=4194303
    #[error("Invalid object identifier: {0}")]
    InvalidObjectIdentifier(String),

    /// Write priority outside 1..=16
    #[error("Priority out of range: {0}")]
    PriorityOutOfRange(String),

    /// Object/property pair not registered on the target
    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    /// Value incompatible with the object's declared value kind
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// No reply within the request deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Remote device declined the operation (e.g. write to a read-only property)
    #[error("Rejected by remote device: {0}")]
    RejectedWrite(String),

    /// Transport could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Session torn down while the request was in flight
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Malformed or unexpected protocol data
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for BACnet operations
pub type BacnetResult<T> = std::result::Result<T, BacnetError>;

impl BacnetError {
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        BacnetError::InvalidAddress(msg.into())
    }

    pub fn invalid_object(msg: impl Into<String>) -> Self {
        BacnetError::InvalidObjectIdentifier(msg.into())
    }

    pub fn priority(priority: u8) -> Self {
        BacnetError::PriorityOutOfRange(format!("priority {priority} not in 1..=16"))
    }

    pub fn unknown_property(msg: impl Into<String>) -> Self {
        BacnetError::UnknownProperty(msg.into())
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        BacnetError::TypeMismatch(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        BacnetError::Timeout(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        BacnetError::RejectedWrite(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        BacnetError::Connection(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        BacnetError::Cancelled(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        BacnetError::Protocol(msg.into())
    }

    /// Whether the caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, BacnetError::Timeout(_) | BacnetError::Connection(_))
    }
}

impl From<std::io::Error> for BacnetError {
    fn from(err: std::io::Error) -> Self {
        BacnetError::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BacnetError::priority(17);
        assert_eq!(err.to_string(), "Priority out of range: priority 17 not in 1..=16");

        let err = BacnetError::timeout("no reply after 3s");
        assert!(err.to_string().contains("Timeout"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(BacnetError::timeout("t").is_retryable());
        assert!(BacnetError::connection("c").is_retryable());
        assert!(!BacnetError::rejected("r").is_retryable());
        assert!(!BacnetError::priority(0).is_retryable());
    }
}
