//! Sealed-box and passphrase sealing.
//!
//! Two blob layouts, both AEAD over ChaCha20-Poly1305 with a BLAKE3-derived
//! key:
//!
//! - Sealed box (public-key sealing): `ephemeral X25519 public (32 bytes) ||
//!   nonce (12 bytes) || ciphertext`. The AEAD key is derived from the
//!   ephemeral/recipient Diffie-Hellman shared secret, so only the holder of
//!   the recipient's secret half can open the blob.
//! - Passphrase sealing: `nonce (12 bytes) || ciphertext`, AEAD key derived
//!   from the passphrase. Used for key material at rest, where the one-time
//!   passphrase is itself sealed to the service's skeleton key.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce as ChaCha20Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::{CryptoError, Result};

/// Nonce size for ChaCha20-Poly1305 (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// X25519 public key size.
const PUBLIC_SIZE: usize = 32;

/// Domain-separation context for sealed-box key derivation.
const SEAL_CONTEXT: &str = "trustplane 2024 sealed box v1";

/// Domain-separation context for passphrase key derivation.
const PASSPHRASE_CONTEXT: &str = "trustplane 2024 passphrase seal v1";

fn aead_encrypt(mut key: [u8; 32], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_SIZE])> {
    let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key));
    key.zeroize();

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = ChaCha20Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    Ok((ciphertext, nonce_bytes))
}

fn aead_decrypt(mut key: [u8; 32], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key));
    key.zeroize();

    let nonce = ChaCha20Nonce::from_slice(nonce);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::Decryption(e.to_string()))
}

/// Seal `plaintext` to `recipient` with an ephemeral DH exchange.
pub(crate) fn seal_to(recipient: &X25519PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    let key = blake3::derive_key(SEAL_CONTEXT, shared.as_bytes());

    let (ciphertext, nonce) = aead_encrypt(key, plaintext)?;

    let mut blob = Vec::with_capacity(PUBLIC_SIZE + NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(ephemeral_public.as_bytes());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Open a sealed-box blob with the recipient's secret half.
pub(crate) fn open_with(secret: &StaticSecret, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < PUBLIC_SIZE + NONCE_SIZE {
        return Err(CryptoError::Decryption(format!(
            "sealed blob too short: {} bytes",
            blob.len()
        )));
    }
    let (public_bytes, rest) = blob.split_at(PUBLIC_SIZE);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let ephemeral_public = X25519PublicKey::from(
        <[u8; 32]>::try_from(public_bytes)
            .map_err(|_| CryptoError::Decryption("bad ephemeral key".to_string()))?,
    );
    let shared = secret.diffie_hellman(&ephemeral_public);
    let key = blake3::derive_key(SEAL_CONTEXT, shared.as_bytes());

    aead_decrypt(key, nonce, ciphertext)
}

/// Seal `plaintext` under a passphrase.
pub fn seal_with_passphrase(passphrase: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = blake3::derive_key(PASSPHRASE_CONTEXT, passphrase.as_bytes());
    let (ciphertext, nonce) = aead_encrypt(key, plaintext)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Open a passphrase-sealed blob.
pub fn open_with_passphrase(passphrase: &str, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_SIZE {
        return Err(CryptoError::Decryption(format!(
            "passphrase blob too short: {} bytes",
            blob.len()
        )));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    let key = blake3::derive_key(PASSPHRASE_CONTEXT, passphrase.as_bytes());
    aead_decrypt(key, nonce, ciphertext)
}

/// One-time random passphrase (256 bits, hex).
pub fn random_passphrase() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
