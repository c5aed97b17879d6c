//! Pack and unpack the secure call envelope.
//!
//! Packing rules:
//! - The body always carries payload, synctime, and function name.
//! - A response signing request requires a response encryption key, and a
//!   signature is only ever applied to an encrypted envelope.
//! - Signing covers the *ciphertext*, never the plaintext, so verification
//!   can happen before decryption.
//! - Response packing degrades to a best-effort status record instead of
//!   failing, so producing a reply can never crash the responder.
//!
//! Unpacking rules:
//! - Tolerant decode: double-encoded bodies are unwrapped repeatedly, up to
//!   [`MAX_DECODE_DEPTH`] layers; an empty remainder is a null result.
//! - Encrypted layers are unwrapped iteratively up to [`MAX_NESTING_DEPTH`]
//!   (an explicit cap instead of unbounded recursion), verifying the
//!   signature against the ciphertext before any decryption.
//! - Verification failures are never downgraded; they abort the unpack.

use serde_json::{json, Value};
use tracing::error;

use trustplane_core::time::synctime;
use trustplane_crypto::{
    EncryptionKeyPair, EncryptionPublicKey, Fingerprint, SigningCert, SigningKeyPair,
};

use crate::error::{EnvelopeError, Result};
use crate::fault::{Fault, FaultRegistry};
use crate::wire::{
    EncryptedEnvelope, PlainEnvelope, WireFault, STATUS_FAULT, STATUS_OK, STATUS_PACKING_FAILURE,
    STATUS_UNKNOWN_FAILURE,
};

/// Maximum number of string-unwrap layers tolerated while decoding.
pub const MAX_DECODE_DEPTH: usize = 8;

/// Maximum number of encrypted envelope layers unwrapped before giving up.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Everything `pack` needs to produce one envelope.
#[derive(Default)]
pub struct PackRequest<'a> {
    pub function: Option<&'a str>,
    pub payload: Option<Value>,

    /// Encrypt the body to this key. Absent: emit the body unencrypted.
    pub encrypt_to: Option<&'a EncryptionPublicKey>,

    /// Embed this key's public form so the far end knows what to encrypt
    /// its reply with.
    pub response_key: Option<&'a EncryptionPublicKey>,

    /// Request that the far end sign its reply with the certificate
    /// matching this fingerprint. Requires `response_key`.
    pub response_sign_cert: Option<&'a SigningCert>,

    /// Sign the ciphertext with this pair. The caller is responsible for
    /// resolving the pair whose fingerprint matches the inbound request.
    pub sign_with: Option<&'a SigningKeyPair>,
}

/// Pack a function call or response body into envelope bytes.
pub fn pack(req: PackRequest<'_>) -> Result<Vec<u8>> {
    if req.response_sign_cert.is_some() && req.response_key.is_none() {
        return Err(EnvelopeError::Packing(
            "signed-but-unencrypted responses are not supported: requesting a signed reply \
             requires a response encryption key"
                .to_string(),
        ));
    }
    if req.sign_with.is_some() && req.encrypt_to.is_none() {
        return Err(EnvelopeError::Packing(
            "a signature can only be applied to an encrypted envelope".to_string(),
        ));
    }

    let body = PlainEnvelope {
        payload: req.payload.unwrap_or(Value::Null),
        function: req.function.map(str::to_string),
        synctime: synctime(),
        encryption_public_key: req.response_key.cloned(),
        sign_with_service_key: req.response_sign_cert.map(SigningCert::fingerprint),
    };
    let body_bytes = serde_json::to_vec(&body)
        .map_err(|e| EnvelopeError::Packing(format!("body serialization failed: {e}")))?;

    let Some(encrypt_to) = req.encrypt_to else {
        return Ok(body_bytes);
    };

    let ciphertext = encrypt_to
        .encrypt(&body_bytes)
        .map_err(|e| EnvelopeError::Packing(format!("body encryption failed: {e}")))?;
    let signature = req.sign_with.map(|pair| hex::encode(pair.sign(&ciphertext)));

    let outer = EncryptedEnvelope {
        data: hex::encode(&ciphertext),
        encrypted: true,
        fingerprint: encrypt_to.fingerprint(),
        synctime: body.synctime.clone(),
        signature,
    };
    serde_json::to_vec(&outer)
        .map_err(|e| EnvelopeError::Packing(format!("envelope serialization failed: {e}")))
}

/// Build the status record for a successful return value.
///
/// Null payloads are a trivial success; non-object values are wrapped as
/// `{"result": value}` so every result has a stable shape.
pub fn return_payload(value: Option<Value>) -> Value {
    match value {
        None | Some(Value::Null) => json!({ "status": STATUS_OK }),
        Some(obj @ Value::Object(_)) => json!({ "status": STATUS_OK, "return": obj }),
        Some(other) => json!({ "status": STATUS_OK, "return": { "result": other } }),
    }
}

/// Outcome of a served call, ready to be packed as a return envelope.
pub enum ReturnOutcome {
    Success(Option<Value>),
    Fault(Fault),
}

/// Pack a return value. Never fails: packing failures degrade to a plain
/// status record (`-3` for a reported packing failure, `-4` when even the
/// fallback serialization misbehaves).
pub fn pack_return(
    function: Option<&str>,
    outcome: ReturnOutcome,
    encrypt_to: Option<&EncryptionPublicKey>,
    sign_with: Option<&SigningKeyPair>,
) -> Vec<u8> {
    let payload = match outcome {
        ReturnOutcome::Success(value) => return_payload(value),
        ReturnOutcome::Fault(fault) => {
            json!({ "status": STATUS_FAULT, "exception": fault.to_wire() })
        }
    };

    let packed = pack(PackRequest {
        function,
        payload: Some(payload),
        encrypt_to,
        sign_with,
        ..PackRequest::default()
    });
    match packed {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "packing response failed, degrading to status record");
            let fallback = PlainEnvelope {
                payload: json!({ "status": STATUS_PACKING_FAILURE, "error": e.to_string() }),
                function: function.map(str::to_string),
                synctime: synctime(),
                encryption_public_key: None,
                sign_with_service_key: None,
            };
            match serde_json::to_vec(&fallback) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(error = %e, "fallback response serialization failed");
                    format!(
                        r#"{{"payload":{{"status":{STATUS_UNKNOWN_FAILURE},"error":"unknown packing failure"}},"synctime":"{}"}}"#,
                        synctime()
                    )
                    .into_bytes()
                }
            }
        }
    }
}

/// Resolver from an embedded fingerprint to the matching decryption pair.
///
/// A service identity resolves across its current, last, and archived keys;
/// a bare [`EncryptionKeyPair`] resolves only itself.
pub trait DecryptionKeys {
    fn decryption_key(&self, fingerprint: &Fingerprint) -> Result<EncryptionKeyPair>;
}

impl DecryptionKeys for EncryptionKeyPair {
    fn decryption_key(&self, fingerprint: &Fingerprint) -> Result<EncryptionKeyPair> {
        if self.fingerprint() == *fingerprint {
            Ok(self.clone())
        } else {
            Err(EnvelopeError::Unpacking(format!(
                "no decryption key for fingerprint {fingerprint}"
            )))
        }
    }
}

/// Everything `unpack` needs to open one envelope.
pub struct UnpackConfig<'a> {
    pub keys: &'a dyn DecryptionKeys,

    /// Require and verify a signature with this certificate. Verification
    /// is only possible on encrypted envelopes.
    pub verify_with: Option<&'a SigningCert>,

    /// Fault constructors for reconstructing remote failures. `None` uses
    /// the default registry.
    pub registry: Option<&'a FaultRegistry>,

    /// Remote function name, for fault annotation.
    pub function: Option<&'a str>,

    /// Remote service name, for fault annotation.
    pub service: Option<&'a str>,
}

impl<'a> UnpackConfig<'a> {
    pub fn new(keys: &'a dyn DecryptionKeys) -> Self {
        Self {
            keys,
            verify_with: None,
            registry: None,
            function: None,
            service: None,
        }
    }
}

/// A decoded argument envelope.
#[derive(Debug, Clone)]
pub struct Unpacked {
    pub function: Option<String>,
    pub payload: Value,
    /// The raw decoded record, for metadata the caller may want (synctime,
    /// embedded response key, requested signing fingerprint).
    pub meta: Value,
}

/// Unwrap repeated string encodings until a structured value appears.
fn tolerant_decode(bytes: &[u8]) -> Result<Option<Value>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| EnvelopeError::Unpacking("envelope bytes are not UTF-8".to_string()))?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    let mut value: Value = serde_json::from_str(text)
        .map_err(|e| EnvelopeError::Unpacking(format!("undecodable envelope: {e}")))?;
    for _ in 0..MAX_DECODE_DEPTH {
        match value {
            Value::String(inner) => {
                if inner.trim().is_empty() {
                    return Ok(None);
                }
                value = serde_json::from_str(&inner).map_err(|e| {
                    EnvelopeError::Unpacking(format!("undecodable nested encoding: {e}"))
                })?;
            }
            other => return Ok(Some(other)),
        }
    }
    Err(EnvelopeError::Unpacking(format!(
        "maximum decode depth ({MAX_DECODE_DEPTH}) exceeded"
    )))
}

/// Unwrap encrypted layers down to the first plain record.
fn decode_record(bytes: &[u8], cfg: &UnpackConfig<'_>) -> Result<Option<Value>> {
    let mut current: Vec<u8> = bytes.to_vec();
    // With no certificate supplied there is nothing to verify.
    let mut verified = cfg.verify_with.is_none();

    for _ in 0..MAX_NESTING_DEPTH {
        let Some(record) = tolerant_decode(&current)? else {
            return Ok(None);
        };
        let is_encrypted = record
            .get("encrypted")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if !is_encrypted {
            if !verified {
                return Err(EnvelopeError::Unpacking(
                    "signature verification requested but the envelope is not encrypted"
                        .to_string(),
                ));
            }
            return Ok(Some(record));
        }

        let data_hex = record
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| EnvelopeError::Unpacking("encrypted envelope has no data".to_string()))?;
        let ciphertext = hex::decode(data_hex)
            .map_err(|e| EnvelopeError::Unpacking(format!("ciphertext is not valid hex: {e}")))?;

        // Verify against the ciphertext before decrypting anything.
        if let Some(cert) = cfg.verify_with {
            if !verified {
                let sig_hex = record.get("signature").and_then(Value::as_str).ok_or_else(|| {
                    EnvelopeError::Unpacking(
                        "a signed response was required but no signature is present".to_string(),
                    )
                })?;
                let signature = hex::decode(sig_hex).map_err(|e| {
                    EnvelopeError::Unpacking(format!("signature is not valid hex: {e}"))
                })?;
                cert.verify(&ciphertext, &signature).map_err(|e| {
                    EnvelopeError::Unpacking(format!("signature verification failed: {e}"))
                })?;
                verified = true;
            }
        }

        let fingerprint: Fingerprint = record
            .get("fingerprint")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EnvelopeError::Unpacking("encrypted envelope has no fingerprint".to_string())
            })?
            .into();
        let key = cfg.keys.decryption_key(&fingerprint)?;
        current = key
            .decrypt(&ciphertext)
            .map_err(|e| EnvelopeError::Unpacking(format!("decryption failed: {e}")))?;
    }
    Err(EnvelopeError::Unpacking(format!(
        "maximum envelope nesting depth ({MAX_NESTING_DEPTH}) exceeded"
    )))
}

/// Unpack an argument envelope into `(function, payload, metadata)`.
pub fn unpack_call(bytes: &[u8], cfg: &UnpackConfig<'_>) -> Result<Unpacked> {
    let Some(record) = decode_record(bytes, cfg)? else {
        return Ok(Unpacked {
            function: None,
            payload: Value::Null,
            meta: Value::Null,
        });
    };
    let payload = record.get("payload").cloned().ok_or_else(|| {
        EnvelopeError::Unpacking("no payload present after unwrapping".to_string())
    })?;
    let function = record
        .get("function")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(Unpacked {
        function,
        payload,
        meta: record,
    })
}

/// Unpack a return-value envelope, reconstructing remote faults.
pub fn unpack_return(bytes: &[u8], cfg: &UnpackConfig<'_>) -> Result<Value> {
    let Some(record) = decode_record(bytes, cfg)? else {
        return Ok(Value::Null);
    };
    let payload = record.get("payload").cloned().ok_or_else(|| {
        EnvelopeError::Unpacking("no payload present after unwrapping".to_string())
    })?;
    let status = payload
        .get("status")
        .and_then(Value::as_i64)
        .ok_or_else(|| EnvelopeError::Unpacking("return payload has no status".to_string()))?;

    if status == STATUS_OK {
        return Ok(payload.get("return").cloned().unwrap_or(Value::Null));
    }

    if let Some(exception) = payload.get("exception") {
        return match serde_json::from_value::<WireFault>(exception.clone()) {
            Ok(wire) => {
                let default_registry;
                let registry = match cfg.registry {
                    Some(registry) => registry,
                    None => {
                        default_registry = FaultRegistry::with_defaults();
                        &default_registry
                    }
                };
                let fault = registry.reconstruct(&wire, cfg.function, cfg.service);
                Err(EnvelopeError::RemoteCall {
                    status,
                    detail: fault.to_string(),
                    cause: Some(Box::new(fault)),
                })
            }
            // A malformed fault payload must not crash the unpack path:
            // surface it with the raw record attached.
            Err(parse_err) => Err(EnvelopeError::RemoteCall {
                status,
                detail: format!("malformed exception record ({parse_err}); raw: {exception}"),
                cause: None,
            }),
        };
    }

    let detail = payload
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("remote failure with no detail; raw payload: {payload}"));
    Err(EnvelopeError::RemoteCall {
        status,
        detail,
        cause: None,
    })
}
