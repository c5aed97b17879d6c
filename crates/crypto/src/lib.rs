//! Cryptographic key primitives for TrustPlane.
//!
//! This crate provides the key material every service carries: Ed25519
//! signing pairs, X25519 encryption pairs with sealed-box semantics over
//! ChaCha20-Poly1305, BLAKE3 fingerprints, and passphrase sealing for key
//! material at rest.
//!
//! # Security Principles
//!
//! - Never roll custom cryptographic primitives
//! - All signatures must be verified before trust
//! - Secrets must never be logged or serialized implicitly
//! - Private halves are zeroized on drop by the underlying crates

pub mod error;
pub mod keys;
pub mod sealed;

pub use error::{CryptoError, Result};
pub use keys::{
    fingerprint_of, EncryptionKeyPair, EncryptionPublicKey, Fingerprint, SigningCert,
    SigningKeyPair,
};
pub use sealed::{open_with_passphrase, random_passphrase, seal_with_passphrase};
