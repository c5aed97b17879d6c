//! Error types for the TrustPlane core seams.

use thiserror::Error;

/// Errors raised by object-store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend I/O failure
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be decoded
    #[error("Malformed record at '{key}': {reason}")]
    Malformed { key: String, reason: String },

    /// JSON serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Errors raised by lease-mutex providers.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The lease could not be acquired within the bounded wait
    #[error("Timed out acquiring lease on '{key}' after {waited_ms}ms")]
    Timeout { key: String, waited_ms: u64 },

    /// Backend-specific failure
    #[error("Lease backend error: {0}")]
    Backend(String),
}
