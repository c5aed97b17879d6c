//! Error types for envelope packing, unpacking, and remote calls.
//!
//! Taxonomy: packing and unpacking errors indicate a caller bug or corrupted
//! transport data and are never retried. Remote-call errors cover both
//! remote-side failures and network faults; idempotent calls may be retried.
//! Cryptographic verification failures are never downgraded — they abort the
//! unpack as unpacking errors.

use thiserror::Error;

/// Errors raised by the envelope codec and transport.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Invalid packing request (e.g. a signed response without a response
    /// encryption key, or signing an unencrypted envelope)
    #[error("Packing error: {0}")]
    Packing(String),

    /// Malformed or undecodable wire data, missing payload, or a failed
    /// signature/decryption step
    #[error("Unpacking error: {0}")]
    Unpacking(String),

    /// The remote side reported a failure, or its reply could not be
    /// interpreted. Carries the reconstructed remote cause when available.
    #[error("Remote function call failed with status {status}: {detail}")]
    RemoteCall {
        status: i64,
        detail: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transport-level fault reaching the peer (remote-call class: the
    /// request may never have been observed by the far end)
    #[error("Network error calling {url}: {reason}")]
    Network { url: String, reason: String },
}

impl EnvelopeError {
    /// Remote-call plus network errors form the retryable class.
    pub fn is_remote_class(&self) -> bool {
        matches!(
            self,
            EnvelopeError::RemoteCall { .. } | EnvelopeError::Network { .. }
        )
    }
}

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, EnvelopeError>;
