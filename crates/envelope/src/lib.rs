//! Secure call envelope for TrustPlane.
//!
//! This crate turns a function name and an argument/return payload into
//! bytes safe to place on an untrusted transport, and inverts that
//! transformation: nested encryption, ciphertext signing, tolerant decoding,
//! and safe cross-process fault transport.
//!
//! # Wire Shape
//!
//! Unencrypted envelopes carry `payload`, `function`, and `synctime`, plus
//! an optional response encryption key and response-signing fingerprint.
//! Encrypted envelopes carry the ciphertext, the fingerprint of the key it
//! was sealed to, and an optional signature over the ciphertext. A signature
//! is present only when the envelope is encrypted.

pub mod codec;
pub mod error;
pub mod fault;
pub mod transport;
pub mod wire;

pub use codec::{
    pack, pack_return, return_payload, unpack_call, unpack_return, DecryptionKeys, PackRequest,
    ReturnOutcome, UnpackConfig, Unpacked, MAX_DECODE_DEPTH, MAX_NESTING_DEPTH,
};
pub use error::{EnvelopeError, Result};
pub use fault::{Fault, FaultRegistry, ReconstructedFault, RemoteFault, RemoteIoFault};
pub use transport::{InMemoryTransport, PeerTransport};
pub use wire::{
    EncryptedEnvelope, PlainEnvelope, WireFault, STATUS_FAULT, STATUS_OK, STATUS_PACKING_FAILURE,
    STATUS_UNKNOWN_FAILURE,
};

#[cfg(feature = "http")]
pub use transport::HttpTransport;
