//! Wire-level envelope records.
//!
//! Field names are stable protocol surface; do not rename.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trustplane_crypto::{EncryptionPublicKey, Fingerprint};

/// Success status for return payloads.
pub const STATUS_OK: i64 = 0;

/// The remote function raised a fault; an `exception` record accompanies it.
pub const STATUS_FAULT: i64 = -1;

/// Packing the response itself failed; an `error` string accompanies it.
pub const STATUS_PACKING_FAILURE: i64 = -3;

/// Packing failed and even the fallback could not be produced normally.
pub const STATUS_UNKNOWN_FAILURE: i64 = -4;

/// Unencrypted envelope body. Also the plaintext of every encrypted layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainEnvelope {
    pub payload: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    pub synctime: String,

    /// Public key the far end should encrypt its reply with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_public_key: Option<EncryptionPublicKey>,

    /// Fingerprint of the certificate the far end should sign its reply with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_with_service_key: Option<Fingerprint>,
}

/// Encrypted envelope: ciphertext plus the metadata needed to open it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Hex-encoded sealed-box ciphertext of a serialized [`PlainEnvelope`]
    /// (or of another encrypted layer).
    pub data: String,

    pub encrypted: bool,

    /// Fingerprint of the encryption key the data was sealed to.
    pub fingerprint: Fingerprint,

    pub synctime: String,

    /// Hex-encoded signature over the raw ciphertext bytes. Present only
    /// when a signed response was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Serializable representation of a fault crossing a trust boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFault {
    pub class: String,
    pub module: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}
