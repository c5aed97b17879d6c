//! Service identity and key lifecycle for TrustPlane.
//!
//! A [`Service`] is a network principal: a stable uid, a canonical URL, and
//! rotating encryption/signing key material. Instances are *unlocked* when
//! they hold private halves (which must never leave the process) and
//! *locked* when they hold only distributable public material.
//!
//! Key rotation moves the current pair to "last" and archives the outgoing
//! pair under a one-time passphrase sealed to the service's skeleton key, so
//! material encrypted under any historical public key stays decryptable by
//! fingerprint lookup indefinitely.

pub mod error;
pub mod keystore;
pub mod remote;
pub mod rotation;
pub mod service;

pub use error::{register_fault_kinds, IdentityError, Result};
pub use keystore::{identity_record_key, rotation_lease_key};
pub use remote::{serve_call, CallHandler, CallOptions, ServiceClient, FN_GET_SERVICE};
pub use rotation::{refresh_local, rotate_now};
pub use service::{KeyMatch, Service, ServiceKeys};
