//! The Service identity object.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use trustplane_core::context::ProcessContext;
use trustplane_core::service_type::{canonical_service_url, ServiceType};
use trustplane_crypto::{
    open_with_passphrase, random_passphrase, seal_with_passphrase, EncryptionKeyPair,
    EncryptionPublicKey, Fingerprint, SigningCert, SigningKeyPair,
};
use trustplane_envelope::{DecryptionKeys, EnvelopeError};

use crate::error::{IdentityError, Result};
use crate::keystore;

/// Prefix of the transient uid a service carries before registration.
pub const STAGE1_PREFIX: &str = "stage1-";

fn default_key_update_interval() -> u64 {
    trustplane_core::config::DEFAULT_KEY_UPDATE_INTERVAL_SECS
}

/// Private key material held only by unlocked instances. Never serialized;
/// the only way it leaves the process is the passphrase-sealed dump path.
#[derive(Debug, Clone)]
struct PrivateMaterial {
    encryption: EncryptionKeyPair,
    signing: SigningKeyPair,
    last_encryption: Option<EncryptionKeyPair>,
    last_signing: Option<SigningKeyPair>,
    /// Decrypts this service's own secrets at rest. Never transmitted.
    skeleton: EncryptionKeyPair,
}

/// A network principal with a stable identity and rotating key material.
///
/// Serialization covers only the locked (public) view; deserialized
/// instances are always locked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    uid: Option<String>,
    service_type: ServiceType,
    canonical_url: String,
    encryption_public_key: Option<EncryptionPublicKey>,
    signing_certificate: Option<SigningCert>,
    last_encryption_public_key: Option<EncryptionPublicKey>,
    last_signing_certificate: Option<SigningCert>,
    last_key_update: Option<u64>,
    #[serde(default = "default_key_update_interval")]
    key_update_interval: u64,
    service_user_uid: Option<String>,
    service_user_name: Option<String>,
    /// Skeleton-sealed credential blob for the internal principal, hex.
    service_user_secrets: Option<String>,
    #[serde(skip)]
    private: Option<PrivateMaterial>,
}

/// A key resolved by fingerprint.
#[derive(Debug, Clone)]
pub enum KeyMatch {
    Encryption(EncryptionKeyPair),
    EncryptionPublic(EncryptionPublicKey),
    Signing(SigningKeyPair),
    SigningPublic(SigningCert),
}

impl Service {
    /// Create a fresh stage1 identity with full private material.
    pub fn create(service_type: ServiceType, raw_url: &str) -> Self {
        let encryption = EncryptionKeyPair::generate();
        let signing = SigningKeyPair::generate();
        let skeleton = EncryptionKeyPair::generate();
        Self {
            uid: Some(format!("{STAGE1_PREFIX}{}", Uuid::new_v4())),
            service_type,
            canonical_url: canonical_service_url(raw_url, Some(service_type)),
            encryption_public_key: Some(encryption.public().clone()),
            signing_certificate: Some(signing.cert()),
            last_encryption_public_key: None,
            last_signing_certificate: None,
            last_key_update: Some(trustplane_core::time::now_secs()),
            key_update_interval: default_key_update_interval(),
            service_user_uid: None,
            service_user_name: None,
            service_user_secrets: None,
            private: Some(PrivateMaterial {
                encryption,
                signing,
                last_encryption: None,
                last_signing: None,
                skeleton,
            }),
        }
    }

    /// Locked handle for a peer we have not fetched yet. Holds no key
    /// material; the first remote refresh fills it in (and has nothing to
    /// verify the reply against).
    pub fn remote_handle(service_type: ServiceType, raw_url: &str) -> Self {
        Self {
            uid: None,
            service_type,
            canonical_url: canonical_service_url(raw_url, Some(service_type)),
            encryption_public_key: None,
            signing_certificate: None,
            last_encryption_public_key: None,
            last_signing_certificate: None,
            last_key_update: None,
            key_update_interval: default_key_update_interval(),
            service_user_uid: None,
            service_user_name: None,
            service_user_secrets: None,
            private: None,
        }
    }

    // --- identity ---------------------------------------------------------

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    pub fn expect_uid(&self) -> Result<&str> {
        self.uid
            .as_deref()
            .ok_or_else(|| IdentityError::Service("service has no uid assigned".to_string()))
    }

    pub fn is_stage1(&self) -> bool {
        self.uid
            .as_deref()
            .is_some_and(|uid| uid.starts_with(STAGE1_PREFIX))
    }

    pub fn is_locked(&self) -> bool {
        self.private.is_none()
    }

    /// Assign the final uid handed out by the registry. A uid is immutable
    /// once assigned: only missing or stage1 uids may be replaced.
    pub fn assign_uid(&mut self, uid: impl Into<String>) -> Result<()> {
        if self.uid.is_some() && !self.is_stage1() {
            return Err(IdentityError::Service(
                "uid is immutable once assigned".to_string(),
            ));
        }
        self.uid = Some(uid.into());
        Ok(())
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    pub fn last_key_update(&self) -> Option<u64> {
        self.last_key_update
    }

    pub fn key_update_interval(&self) -> u64 {
        self.key_update_interval
    }

    pub fn set_key_update_interval(&mut self, interval_secs: u64) {
        self.key_update_interval = interval_secs;
    }

    pub fn service_user_uid(&self) -> Option<&str> {
        self.service_user_uid.as_deref()
    }

    pub fn service_user_name(&self) -> Option<&str> {
        self.service_user_name.as_deref()
    }

    pub fn service_user_secrets(&self) -> Option<&str> {
        self.service_user_secrets.as_deref()
    }

    pub fn set_service_user(
        &mut self,
        uid: impl Into<String>,
        name: impl Into<String>,
        sealed_secrets_hex: impl Into<String>,
    ) {
        self.service_user_uid = Some(uid.into());
        self.service_user_name = Some(name.into());
        self.service_user_secrets = Some(sealed_secrets_hex.into());
    }

    // --- key material -----------------------------------------------------

    pub fn encryption_public_key(&self) -> Option<&EncryptionPublicKey> {
        self.encryption_public_key.as_ref()
    }

    pub fn signing_certificate(&self) -> Option<&SigningCert> {
        self.signing_certificate.as_ref()
    }

    pub fn last_encryption_public_key(&self) -> Option<&EncryptionPublicKey> {
        self.last_encryption_public_key.as_ref()
    }

    pub fn last_signing_certificate(&self) -> Option<&SigningCert> {
        self.last_signing_certificate.as_ref()
    }

    fn private(&self) -> Result<&PrivateMaterial> {
        self.private.as_ref().ok_or_else(|| {
            IdentityError::Permission(
                "operation requires private key material but the service is locked".to_string(),
            )
        })
    }

    pub(crate) fn skeleton(&self) -> Result<&EncryptionKeyPair> {
        Ok(&self.private()?.skeleton)
    }

    /// The distributable public view.
    pub fn locked_view(&self) -> Service {
        let mut view = self.clone();
        view.private = None;
        view
    }

    /// True when the key material is due for rotation: stage1, a missing
    /// service user or public key, or an elapsed update interval.
    pub fn should_refresh(&self, now: u64) -> bool {
        if self.is_stage1() {
            return true;
        }
        if self.service_user_uid.is_none()
            || self.encryption_public_key.is_none()
            || self.signing_certificate.is_none()
        {
            return true;
        }
        match self.last_key_update {
            None => true,
            Some(last) => now > last + self.key_update_interval,
        }
    }

    // --- checked crypto wrappers ------------------------------------------

    /// Sign with the current signing key. Fails on a locked instance.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.private()?.signing.sign(message))
    }

    /// Verify against the current signing certificate. Fails when no
    /// certificate is held at all.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let cert = self.signing_certificate.as_ref().ok_or_else(|| {
            IdentityError::Permission("no signing certificate held for verification".to_string())
        })?;
        cert.verify(message, signature)?;
        Ok(())
    }

    /// Seal to the current encryption public key. Fails when none is held.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.encryption_public_key.as_ref().ok_or_else(|| {
            IdentityError::Permission("no encryption key held for encryption".to_string())
        })?;
        Ok(key.encrypt(plaintext)?)
    }

    /// Open with the current encryption secret. Fails on a locked instance.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        Ok(self.private()?.encryption.decrypt(blob)?)
    }

    /// Seal a secret to this service's skeleton key (hex blob).
    pub fn seal_secret(&self, plaintext: &[u8]) -> Result<String> {
        Ok(hex::encode(self.private()?.skeleton.encrypt(plaintext)?))
    }

    /// Open a skeleton-sealed hex blob.
    pub fn open_secret(&self, sealed_hex: &str) -> Result<Vec<u8>> {
        let blob = hex::decode(sealed_hex)
            .map_err(|e| IdentityError::Service(format!("sealed secret is not valid hex: {e}")))?;
        Ok(self.private()?.skeleton.decrypt(&blob)?)
    }

    // --- fingerprint lookup -----------------------------------------------

    /// Resolve a key by fingerprint: current, then last, then the archived
    /// key store. Requesting private material on a locked instance is a
    /// permission error; an unknown fingerprint is a key-manipulation error.
    pub fn get_key(
        &self,
        ctx: &ProcessContext,
        fingerprint: &Fingerprint,
        private: bool,
    ) -> Result<KeyMatch> {
        if private && self.private.is_none() {
            return Err(IdentityError::Permission(
                "a private key was requested but the service is locked".to_string(),
            ));
        }

        if let Some(public) = &self.encryption_public_key {
            if public.fingerprint() == *fingerprint {
                return Ok(if private {
                    KeyMatch::Encryption(self.private()?.encryption.clone())
                } else {
                    KeyMatch::EncryptionPublic(public.clone())
                });
            }
        }
        if let Some(cert) = &self.signing_certificate {
            if cert.fingerprint() == *fingerprint {
                return Ok(if private {
                    KeyMatch::Signing(self.private()?.signing.clone())
                } else {
                    KeyMatch::SigningPublic(cert.clone())
                });
            }
        }
        if let Some(public) = &self.last_encryption_public_key {
            if public.fingerprint() == *fingerprint {
                return Ok(if private {
                    let pair = self.private()?.last_encryption.clone().ok_or_else(|| {
                        IdentityError::KeyManipulation(
                            "last encryption secret is not held".to_string(),
                        )
                    })?;
                    KeyMatch::Encryption(pair)
                } else {
                    KeyMatch::EncryptionPublic(public.clone())
                });
            }
        }
        if let Some(cert) = &self.last_signing_certificate {
            if cert.fingerprint() == *fingerprint {
                return Ok(if private {
                    let pair = self.private()?.last_signing.clone().ok_or_else(|| {
                        IdentityError::KeyManipulation(
                            "last signing secret is not held".to_string(),
                        )
                    })?;
                    KeyMatch::Signing(pair)
                } else {
                    KeyMatch::SigningPublic(cert.clone())
                });
            }
        }

        if let Some(uid) = self.uid.as_deref() {
            if let Some(matched) = keystore::lookup_archived(ctx, self, uid, fingerprint, private)?
            {
                return Ok(matched);
            }
        }

        Err(IdentityError::KeyManipulation(format!(
            "no key matches fingerprint {fingerprint}"
        )))
    }

    // --- rotation internals -----------------------------------------------

    /// Move current pairs to "last" and install fresh ones. Returns the
    /// outgoing pairs so the caller can archive them first.
    pub(crate) fn rotate_keys(&mut self, now: u64) -> Result<RetiredKeys> {
        let private = self.private.as_mut().ok_or_else(|| {
            IdentityError::Permission("cannot rotate keys on a locked service".to_string())
        })?;

        let new_encryption = EncryptionKeyPair::generate();
        let new_signing = SigningKeyPair::generate();

        let retired_encryption = std::mem::replace(&mut private.encryption, new_encryption.clone());
        let retired_signing = std::mem::replace(&mut private.signing, new_signing.clone());
        private.last_encryption = Some(retired_encryption.clone());
        private.last_signing = Some(retired_signing.clone());

        self.last_encryption_public_key = Some(retired_encryption.public().clone());
        self.last_signing_certificate = Some(retired_signing.cert());
        self.encryption_public_key = Some(new_encryption.public().clone());
        self.signing_certificate = Some(new_signing.cert());
        self.last_key_update = Some(now);

        Ok(RetiredKeys {
            encryption: retired_encryption,
            signing: retired_signing,
        })
    }

    /// Adopt the public state of an authoritative locked record, enforcing
    /// the uid and service-type invariants.
    pub(crate) fn apply_public_record(&mut self, record: &Service) -> Result<()> {
        if let (Some(expected), Some(received)) = (self.uid.as_deref(), record.uid.as_deref()) {
            if expected != received {
                return Err(IdentityError::Service(format!(
                    "uid mismatch: expected {expected}, received {received}"
                )));
            }
        }
        if record.service_type != self.service_type {
            return Err(IdentityError::Service(format!(
                "service type mismatch: expected {}, received {}",
                self.service_type, record.service_type
            )));
        }

        self.uid = record.uid.clone().or_else(|| self.uid.clone());
        self.encryption_public_key = record.encryption_public_key.clone();
        self.signing_certificate = record.signing_certificate.clone();
        self.last_encryption_public_key = record.last_encryption_public_key.clone();
        self.last_signing_certificate = record.last_signing_certificate.clone();
        self.last_key_update = record.last_key_update;
        self.key_update_interval = record.key_update_interval;
        self.service_user_uid = record.service_user_uid.clone();
        self.service_user_name = record.service_user_name.clone();
        self.service_user_secrets = record.service_user_secrets.clone();
        Ok(())
    }

    // --- key dump / load --------------------------------------------------

    /// Serialize the current (and optionally last) secret keys for archival:
    /// sealed under a one-time passphrase that is itself sealed to the
    /// skeleton key.
    pub fn dump_keys(&self, include_last: bool) -> Result<Vec<u8>> {
        let private = self.private()?;

        let mut record = json!({
            "uid": self.uid,
            "encryption_secret": private.encryption.secret_to_hex(),
            "signing_secret": private.signing.secret_to_hex(),
        });
        if include_last {
            if let Some(last) = &private.last_encryption {
                record["last_encryption_secret"] = json!(last.secret_to_hex());
            }
            if let Some(last) = &private.last_signing {
                record["last_signing_secret"] = json!(last.secret_to_hex());
            }
        }

        let passphrase = random_passphrase();
        let sealed = seal_with_passphrase(&passphrase, &serde_json::to_vec(&record)?)?;
        let sealed_passphrase = private.skeleton.public().encrypt(passphrase.as_bytes())?;

        let blob = json!({
            "sealed_passphrase": hex::encode(sealed_passphrase),
            "data": hex::encode(sealed),
        });
        Ok(serde_json::to_vec(&blob)?)
    }

    /// Restore keys from a [`Service::dump_keys`] blob. Requires the
    /// skeleton key, so only an unlocked instance can load.
    pub fn load_keys(&mut self, blob: &[u8]) -> Result<()> {
        let parsed: serde_json::Value = serde_json::from_slice(blob)?;
        let sealed_passphrase = parsed
            .get("sealed_passphrase")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| IdentityError::Service("key blob has no sealed passphrase".to_string()))?;
        let data = parsed
            .get("data")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| IdentityError::Service("key blob has no data".to_string()))?;

        let skeleton = &self.private()?.skeleton;
        let passphrase_bytes = skeleton.decrypt(&hex::decode(sealed_passphrase).map_err(|e| {
            IdentityError::Service(format!("sealed passphrase is not valid hex: {e}"))
        })?)?;
        let passphrase = String::from_utf8(passphrase_bytes)
            .map_err(|_| IdentityError::Service("passphrase is not valid UTF-8".to_string()))?;

        let plain = open_with_passphrase(
            &passphrase,
            &hex::decode(data)
                .map_err(|e| IdentityError::Service(format!("key data is not valid hex: {e}")))?,
        )?;
        let record: serde_json::Value = serde_json::from_slice(&plain)?;

        let encryption = EncryptionKeyPair::from_secret_hex(
            record
                .get("encryption_secret")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    IdentityError::Service("key record has no encryption secret".to_string())
                })?,
        )?;
        let signing = SigningKeyPair::from_secret_hex(
            record
                .get("signing_secret")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    IdentityError::Service("key record has no signing secret".to_string())
                })?,
        )?;
        let last_encryption = record
            .get("last_encryption_secret")
            .and_then(serde_json::Value::as_str)
            .map(EncryptionKeyPair::from_secret_hex)
            .transpose()?;
        let last_signing = record
            .get("last_signing_secret")
            .and_then(serde_json::Value::as_str)
            .map(SigningKeyPair::from_secret_hex)
            .transpose()?;

        self.encryption_public_key = Some(encryption.public().clone());
        self.signing_certificate = Some(signing.cert());
        self.last_encryption_public_key =
            last_encryption.as_ref().map(|k| k.public().clone());
        self.last_signing_certificate = last_signing.as_ref().map(SigningKeyPair::cert);

        let private = self.private.as_mut().ok_or_else(|| {
            IdentityError::Permission("cannot load keys into a locked service".to_string())
        })?;
        private.encryption = encryption;
        private.signing = signing;
        private.last_encryption = last_encryption;
        private.last_signing = last_signing;
        Ok(())
    }
}

pub(crate) struct RetiredKeys {
    pub encryption: EncryptionKeyPair,
    pub signing: SigningKeyPair,
}

/// Fingerprint resolver over a service's keys, for envelope unpacking.
pub struct ServiceKeys<'a> {
    pub service: &'a Service,
    pub ctx: &'a ProcessContext,
}

impl DecryptionKeys for ServiceKeys<'_> {
    fn decryption_key(
        &self,
        fingerprint: &Fingerprint,
    ) -> std::result::Result<EncryptionKeyPair, EnvelopeError> {
        match self.service.get_key(self.ctx, fingerprint, true) {
            Ok(KeyMatch::Encryption(pair)) => Ok(pair),
            Ok(_) => Err(EnvelopeError::Unpacking(format!(
                "fingerprint {fingerprint} resolves to a signing key, not a decryption key"
            ))),
            Err(e) => Err(EnvelopeError::Unpacking(format!(
                "could not resolve decryption key for {fingerprint}: {e}"
            ))),
        }
    }
}
