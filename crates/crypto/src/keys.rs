//! Signing and encryption key pairs with stable fingerprints.
//!
//! A fingerprint is the hex BLAKE3 hash of a key's public bytes. Envelopes
//! and the key archive select keys by fingerprint, so it must be stable for
//! the lifetime of a key pair.
//!
//! Public halves serialize as hex strings; private halves have no serde
//! implementations at all and can only leave the process through the
//! explicit, passphrase-sealed dump path in the identity crate.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::{CryptoError, Result};
use crate::sealed;

/// Stable identifier for a public key or certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Fingerprint(s)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Fingerprint(s.to_string())
    }
}

/// Fingerprint of arbitrary public key bytes.
pub fn fingerprint_of(public_bytes: &[u8]) -> Fingerprint {
    Fingerprint(hex::encode(blake3::hash(public_bytes).as_bytes()))
}

fn decode_key_bytes(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| CryptoError::MalformedKey(format!("invalid hex: {e}")))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::MalformedKey("expected 32 key bytes".to_string()))?;
    Ok(arr)
}

// --- signing ---------------------------------------------------------------

/// Public signing certificate: the distributable half of a signing pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SigningCert {
    key: VerifyingKey,
}

impl SigningCert {
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint_of(self.key.as_bytes())
    }

    /// Verify `signature` (64 raw bytes) over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let sig = Signature::from_slice(signature)
            .map_err(|e| CryptoError::SignatureVerification(format!("malformed signature: {e}")))?;
        self.key
            .verify(message, &sig)
            .map_err(|e| CryptoError::SignatureVerification(e.to_string()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.key.as_bytes())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = decode_key_bytes(hex_str)?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(Self { key })
    }
}

impl TryFrom<String> for SigningCert {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self> {
        SigningCert::from_hex(&value)
    }
}

impl From<SigningCert> for String {
    fn from(cert: SigningCert) -> Self {
        cert.to_hex()
    }
}

/// Ed25519 signing pair.
#[derive(Clone)]
pub struct SigningKeyPair {
    signing: SigningKey,
}

impl SigningKeyPair {
    /// Generate a fresh signing pair from OS entropy.
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut secret_bytes);
        Self {
            signing: SigningKey::from_bytes(&secret_bytes),
        }
    }

    pub fn cert(&self) -> SigningCert {
        SigningCert {
            key: self.signing.verifying_key(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.cert().fingerprint()
    }

    /// Sign `message`, returning the 64 raw signature bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }

    /// Hex of the secret half, for the explicit dump path only.
    pub fn secret_to_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    pub fn from_secret_hex(hex_str: &str) -> Result<Self> {
        let bytes = decode_key_bytes(hex_str)?;
        Ok(Self {
            signing: SigningKey::from_bytes(&bytes),
        })
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

// --- encryption ------------------------------------------------------------

/// Public encryption key: the distributable half of an encryption pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncryptionPublicKey {
    key: X25519PublicKey,
}

impl EncryptionPublicKey {
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint_of(self.key.as_bytes())
    }

    /// Seal `plaintext` so only the holder of the matching secret can open it.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        sealed::seal_to(&self.key, plaintext)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.key.as_bytes())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = decode_key_bytes(hex_str)?;
        Ok(Self {
            key: X25519PublicKey::from(bytes),
        })
    }
}

impl TryFrom<String> for EncryptionPublicKey {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self> {
        EncryptionPublicKey::from_hex(&value)
    }
}

impl From<EncryptionPublicKey> for String {
    fn from(key: EncryptionPublicKey) -> Self {
        key.to_hex()
    }
}

/// X25519 encryption pair with sealed-box encrypt/decrypt.
#[derive(Clone)]
pub struct EncryptionKeyPair {
    public: EncryptionPublicKey,
    secret: StaticSecret,
}

impl EncryptionKeyPair {
    /// Generate a fresh encryption pair from OS entropy.
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut secret_bytes);
        let secret = StaticSecret::from(secret_bytes);
        let public = EncryptionPublicKey {
            key: X25519PublicKey::from(&secret),
        };
        Self { public, secret }
    }

    pub fn public(&self) -> &EncryptionPublicKey {
        &self.public
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.public.fingerprint()
    }

    /// Seal to our own public half.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.public.encrypt(plaintext)
    }

    /// Open a sealed-box blob produced for our public half.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        sealed::open_with(&self.secret, blob)
    }

    /// Hex of the secret half, for the explicit dump path only.
    pub fn secret_to_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    pub fn from_secret_hex(hex_str: &str) -> Result<Self> {
        let bytes = decode_key_bytes(hex_str)?;
        let secret = StaticSecret::from(bytes);
        let public = EncryptionPublicKey {
            key: X25519PublicKey::from(&secret),
        };
        Ok(Self { public, secret })
    }
}

impl std::fmt::Debug for EncryptionKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKeyPair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}
