//! Error types for service identity operations.

use thiserror::Error;

use trustplane_core::error::{LeaseError, StoreError};
use trustplane_crypto::CryptoError;
use trustplane_envelope::{EnvelopeError, Fault, FaultRegistry};

/// Module namespace for identity fault classes.
pub const FAULT_MODULE_IDENTITY: &str = "trustplane.identity";

/// Errors raised by identity and key-lifecycle operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Local configuration or identity-state fault, fatal to the operation
    #[error("Service error: {0}")]
    Service(String),

    /// Private material was required but the instance is locked or holds
    /// no key material at all
    #[error("Permission error: {0}")]
    Permission(String),

    /// No key matches the requested fingerprint, or the wrong key kind was
    /// requested. Usually stale trust state; a key refresh resolves it.
    #[error("Key manipulation error: {0}")]
    KeyManipulation(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;

impl From<&IdentityError> for Fault {
    fn from(err: &IdentityError) -> Self {
        match err {
            IdentityError::Service(_) => {
                Fault::new(FAULT_MODULE_IDENTITY, "ServiceError", err.to_string())
            }
            IdentityError::Permission(_) => {
                Fault::new(FAULT_MODULE_IDENTITY, "PermissionError", err.to_string())
            }
            IdentityError::KeyManipulation(_) => {
                Fault::new(FAULT_MODULE_IDENTITY, "KeyManipulationError", err.to_string())
            }
            IdentityError::Crypto(inner) => Fault::from(inner),
            IdentityError::Envelope(inner) => Fault::from(inner),
            _ => Fault::new(FAULT_MODULE_IDENTITY, "ServiceError", err.to_string()),
        }
    }
}

/// Register the identity fault classes with a reconstruction registry.
pub fn register_fault_kinds(registry: &mut FaultRegistry) {
    registry.register(FAULT_MODULE_IDENTITY, "ServiceError", |m| {
        Box::new(IdentityError::Service(m))
    });
    registry.register(FAULT_MODULE_IDENTITY, "PermissionError", |m| {
        Box::new(IdentityError::Permission(m))
    });
    registry.register(FAULT_MODULE_IDENTITY, "KeyManipulationError", |m| {
        Box::new(IdentityError::KeyManipulation(m))
    });
}
