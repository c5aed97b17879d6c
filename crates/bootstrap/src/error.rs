//! Error types for trust bootstrap and admin authorization.

use thiserror::Error;

use trustplane_core::error::{LeaseError, StoreError};
use trustplane_crypto::CryptoError;
use trustplane_envelope::{EnvelopeError, Fault, FaultRegistry};
use trustplane_identity::IdentityError;

/// Module namespace for bootstrap fault classes.
pub const FAULT_MODULE_BOOTSTRAP: &str = "trustplane.bootstrap";

/// Errors raised while bootstrapping a service or mutating the admin
/// registry.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The service account exists but is in a state that forbids the
    /// requested operation (in-progress construction, mismatched identity)
    #[error("Service account error: {0}")]
    ServiceAccount(String),

    /// An operation needed a service account that does not exist
    #[error("Missing service account: {0}")]
    MissingServiceAccount(String),

    /// A peer service required for bootstrap could not be found
    #[error("Missing service: {0}")]
    MissingService(String),

    /// The caller is not authorized for an admin-gated operation
    #[error("Permission error: {0}")]
    Permission(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

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

/// Result type for bootstrap operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;

impl From<&BootstrapError> for Fault {
    fn from(err: &BootstrapError) -> Self {
        match err {
            BootstrapError::ServiceAccount(_) => Fault::new(
                FAULT_MODULE_BOOTSTRAP,
                "ServiceAccountError",
                err.to_string(),
            ),
            BootstrapError::MissingServiceAccount(_) => Fault::new(
                FAULT_MODULE_BOOTSTRAP,
                "MissingServiceAccountError",
                err.to_string(),
            ),
            BootstrapError::MissingService(_) => Fault::new(
                FAULT_MODULE_BOOTSTRAP,
                "MissingServiceError",
                err.to_string(),
            ),
            BootstrapError::Permission(_) => {
                Fault::new(FAULT_MODULE_BOOTSTRAP, "PermissionError", err.to_string())
            }
            BootstrapError::Identity(inner) => Fault::from(inner),
            BootstrapError::Crypto(inner) => Fault::from(inner),
            BootstrapError::Envelope(inner) => Fault::from(inner),
            _ => Fault::new(
                FAULT_MODULE_BOOTSTRAP,
                "ServiceAccountError",
                err.to_string(),
            ),
        }
    }
}

/// Register the bootstrap fault classes with a reconstruction registry.
pub fn register_fault_kinds(registry: &mut FaultRegistry) {
    registry.register(FAULT_MODULE_BOOTSTRAP, "ServiceAccountError", |m| {
        Box::new(BootstrapError::ServiceAccount(m))
    });
    registry.register(FAULT_MODULE_BOOTSTRAP, "MissingServiceAccountError", |m| {
        Box::new(BootstrapError::MissingServiceAccount(m))
    });
    registry.register(FAULT_MODULE_BOOTSTRAP, "MissingServiceError", |m| {
        Box::new(BootstrapError::MissingService(m))
    });
    registry.register(FAULT_MODULE_BOOTSTRAP, "PermissionError", |m| {
        Box::new(BootstrapError::Permission(m))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_round_trip_for_bootstrap_kinds() {
        let mut registry = FaultRegistry::with_defaults();
        register_fault_kinds(&mut registry);

        let original = BootstrapError::ServiceAccount("construction in progress".to_string());
        let wire = Fault::from(&original).to_wire();
        assert_eq!(wire.class, "ServiceAccountError");
        assert_eq!(wire.module, FAULT_MODULE_BOOTSTRAP);

        let rebuilt = registry.reconstruct(&wire, None, None);
        let cause = rebuilt.cause().downcast_ref::<BootstrapError>().unwrap();
        assert!(matches!(cause, BootstrapError::ServiceAccount(_)));
        assert!(cause.to_string().contains("construction in progress"));
    }

    #[test]
    fn test_nested_identity_fault_keeps_its_module() {
        let inner = IdentityError::Permission("locked".to_string());
        let wire = Fault::from(&BootstrapError::Identity(inner)).to_wire();
        assert_eq!(wire.module, "trustplane.identity");
        assert_eq!(wire.class, "PermissionError");
    }
}
