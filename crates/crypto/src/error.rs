//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors raised by key handling and sealed-box operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A signature did not verify against the presented certificate
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// Key bytes could not be decoded into a usable key
    #[error("Malformed key material: {0}")]
    MalformedKey(String),

    /// AEAD encryption failure
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// AEAD decryption or sealed-box layout failure
    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// Result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
