//! Persistent key archive and identity records.
//!
//! Store layout:
//! - `identity/<service_type>` — the locked identity record for this node.
//! - `keys/<uid>/archive/<ts>/<fp>` — one archived key pair, its secret
//!   sealed under a one-time passphrase that is itself sealed to the
//!   service's skeleton key. Keyed by fingerprint so rotations landing in
//!   the same second cannot overwrite each other's records.
//! - `keys/<uid>/fingerprint/<fp>` — pointer from a fingerprint to its
//!   archive record, so historical lookups never scan.

use serde::{Deserialize, Serialize};
use tracing::debug;

use trustplane_core::context::ProcessContext;
use trustplane_core::error::StoreError;
use trustplane_core::service_type::ServiceType;
use trustplane_core::store::ObjectStore;
use trustplane_crypto::{
    open_with_passphrase, random_passphrase, seal_with_passphrase, EncryptionKeyPair,
    EncryptionPublicKey, Fingerprint, SigningCert, SigningKeyPair,
};

use crate::error::{IdentityError, Result};
use crate::service::{KeyMatch, RetiredKeys, Service};

const KIND_ENCRYPTION: &str = "encryption";
const KIND_SIGNING: &str = "signing";

/// Store key of the identity record for a service type.
pub fn identity_record_key(service_type: ServiceType) -> String {
    format!("identity/{service_type}")
}

/// Lease key serializing key rotation for one service.
pub fn rotation_lease_key(uid: &str) -> String {
    format!("lease/rotate/{uid}")
}

fn archive_record_key(uid: &str, archived_at: u64, fingerprint: &Fingerprint) -> String {
    format!("keys/{uid}/archive/{archived_at}/{fingerprint}")
}

fn fingerprint_pointer_key(uid: &str, fingerprint: &Fingerprint) -> String {
    format!("keys/{uid}/fingerprint/{fingerprint}")
}

/// One archived key pair. The secret hex is passphrase-sealed; the
/// passphrase is sealed to the owning service's skeleton key.
#[derive(Debug, Serialize, Deserialize)]
struct ArchivedKeyRecord {
    archived_at: u64,
    kind: String,
    fingerprint: Fingerprint,
    public: String,
    sealed_secret: String,
    sealed_passphrase: String,
}

fn archive_one(
    ctx: &ProcessContext,
    service: &Service,
    uid: &str,
    kind: &str,
    public_hex: String,
    secret_hex: &str,
    fingerprint: Fingerprint,
    archived_at: u64,
) -> Result<()> {
    let passphrase = random_passphrase();
    let sealed_secret = seal_with_passphrase(&passphrase, secret_hex.as_bytes())?;
    let sealed_passphrase = service
        .skeleton()?
        .public()
        .encrypt(passphrase.as_bytes())?;

    let record = ArchivedKeyRecord {
        archived_at,
        kind: kind.to_string(),
        fingerprint: fingerprint.clone(),
        public: public_hex,
        sealed_secret: hex::encode(sealed_secret),
        sealed_passphrase: hex::encode(sealed_passphrase),
    };

    let store = ctx.store();
    let record_key = archive_record_key(uid, archived_at, &fingerprint);
    store.set_json(&record_key, &serde_json::to_value(&record)?)?;
    store.set_bytes(
        &fingerprint_pointer_key(uid, &fingerprint),
        record_key.as_bytes(),
    )?;
    debug!(uid, kind, %fingerprint, "archived retired key pair");
    Ok(())
}

/// Archive both retired pairs from a rotation. The pairs stay resolvable by
/// fingerprint forever, so data sealed to any historical key stays readable.
pub(crate) fn archive_retired(
    ctx: &ProcessContext,
    service: &Service,
    retired: &RetiredKeys,
    archived_at: u64,
) -> Result<()> {
    let uid = service.expect_uid()?;
    archive_one(
        ctx,
        service,
        uid,
        KIND_ENCRYPTION,
        retired.encryption.public().to_hex(),
        &retired.encryption.secret_to_hex(),
        retired.encryption.fingerprint(),
        archived_at,
    )?;
    archive_one(
        ctx,
        service,
        uid,
        KIND_SIGNING,
        retired.signing.cert().to_hex(),
        &retired.signing.secret_to_hex(),
        retired.signing.fingerprint(),
        archived_at,
    )
}

fn open_archived_secret(service: &Service, record: &ArchivedKeyRecord) -> Result<String> {
    let sealed_passphrase = hex::decode(&record.sealed_passphrase).map_err(|e| {
        IdentityError::KeyManipulation(format!("archived passphrase is not valid hex: {e}"))
    })?;
    let passphrase_bytes = service.skeleton()?.decrypt(&sealed_passphrase)?;
    let passphrase = String::from_utf8(passphrase_bytes).map_err(|_| {
        IdentityError::KeyManipulation("archived passphrase is not valid UTF-8".to_string())
    })?;

    let sealed_secret = hex::decode(&record.sealed_secret).map_err(|e| {
        IdentityError::KeyManipulation(format!("archived secret is not valid hex: {e}"))
    })?;
    let secret_bytes = open_with_passphrase(&passphrase, &sealed_secret)?;
    String::from_utf8(secret_bytes).map_err(|_| {
        IdentityError::KeyManipulation("archived secret is not valid UTF-8".to_string())
    })
}

/// Resolve a fingerprint against the key archive. `Ok(None)` means the
/// fingerprint has no archive entry; the caller decides whether that is
/// fatal.
pub(crate) fn lookup_archived(
    ctx: &ProcessContext,
    service: &Service,
    uid: &str,
    fingerprint: &Fingerprint,
    private: bool,
) -> Result<Option<KeyMatch>> {
    let store = ctx.store();
    let Some(pointer) = store.get_bytes(&fingerprint_pointer_key(uid, fingerprint))? else {
        return Ok(None);
    };
    let record_key = String::from_utf8(pointer).map_err(|_| StoreError::Malformed {
        key: fingerprint_pointer_key(uid, fingerprint),
        reason: "pointer is not UTF-8".to_string(),
    })?;
    let Some(value) = store.get_json(&record_key)? else {
        return Err(IdentityError::KeyManipulation(format!(
            "dangling archive pointer for fingerprint {fingerprint}"
        )));
    };
    let record: ArchivedKeyRecord = serde_json::from_value(value)?;
    if record.fingerprint != *fingerprint {
        return Err(IdentityError::KeyManipulation(format!(
            "archive record {record_key} holds key {}, not {fingerprint}",
            record.fingerprint
        )));
    }

    let matched = match (record.kind.as_str(), private) {
        (KIND_ENCRYPTION, false) => {
            KeyMatch::EncryptionPublic(EncryptionPublicKey::from_hex(&record.public)?)
        }
        (KIND_SIGNING, false) => KeyMatch::SigningPublic(SigningCert::from_hex(&record.public)?),
        (KIND_ENCRYPTION, true) => {
            let secret_hex = open_archived_secret(service, &record)?;
            KeyMatch::Encryption(EncryptionKeyPair::from_secret_hex(&secret_hex)?)
        }
        (KIND_SIGNING, true) => {
            let secret_hex = open_archived_secret(service, &record)?;
            KeyMatch::Signing(SigningKeyPair::from_secret_hex(&secret_hex)?)
        }
        (other, _) => {
            return Err(IdentityError::KeyManipulation(format!(
                "archive record {record_key} has unknown kind '{other}'"
            )))
        }
    };
    Ok(Some(matched))
}

/// Persist the locked identity record and invalidate the caches describing
/// it. Callers mutating the record must hold the appropriate lease.
pub fn store_identity_record(ctx: &ProcessContext, service: &Service) -> Result<()> {
    let key = identity_record_key(service.service_type());
    let record = serde_json::to_value(service.locked_view())?;
    ctx.store().set_json(&key, &record)?;
    ctx.invalidate_service_caches();
    Ok(())
}

/// Read the identity record straight from the store, bypassing the process
/// cache. Re-validation under a lease must use this: the cache may predate
/// a concurrent worker's write.
pub fn load_identity_record_uncached(
    ctx: &ProcessContext,
    service_type: ServiceType,
) -> Result<Option<Service>> {
    let Some(value) = ctx.store().get_json(&identity_record_key(service_type))? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_value(value)?))
}

/// Load the identity record for a service type, via the process cache.
pub fn load_identity_record(
    ctx: &ProcessContext,
    service_type: ServiceType,
) -> Result<Option<Service>> {
    let key = identity_record_key(service_type);
    if let Some(cached) = ctx.cached_service_info(&key) {
        return Ok(Some(serde_json::from_value(cached)?));
    }
    let Some(value) = ctx.store().get_json(&key)? else {
        return Ok(None);
    };
    ctx.put_service_info(&key, value.clone());
    Ok(Some(serde_json::from_value(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use trustplane_core::lease::MemoryLeases;
    use trustplane_core::store::{MemoryStore, ObjectStore};

    fn ctx() -> ProcessContext {
        ProcessContext::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLeases::new(Duration::from_millis(200))),
        )
    }

    fn unlocked_service() -> Service {
        let mut service = Service::create(ServiceType::Compute, "https://c.example.com");
        service.assign_uid("svc-1").unwrap();
        service
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(identity_record_key(ServiceType::Compute), "identity/compute");
        assert_eq!(rotation_lease_key("svc-1"), "lease/rotate/svc-1");
        assert_eq!(
            archive_record_key("svc-1", 99, &Fingerprint::from("abcd")),
            "keys/svc-1/archive/99/abcd"
        );
    }

    #[test]
    fn test_archive_and_lookup_round_trip() {
        let ctx = ctx();
        let mut service = unlocked_service();
        let old_enc_fp = service.encryption_public_key().unwrap().fingerprint();
        let old_sign_fp = service.signing_certificate().unwrap().fingerprint();
        let blob = service.encrypt(b"sealed before rotation").unwrap();

        let retired = service.rotate_keys(1000).unwrap();
        archive_retired(&ctx, &service, &retired, 1000).unwrap();

        // Public lookup works without private material.
        let matched = lookup_archived(&ctx, &service.locked_view(), "svc-1", &old_sign_fp, false)
            .unwrap()
            .unwrap();
        assert!(matches!(matched, KeyMatch::SigningPublic(_)));

        // Private lookup recovers a usable pair.
        let matched = lookup_archived(&ctx, &service, "svc-1", &old_enc_fp, true)
            .unwrap()
            .unwrap();
        let KeyMatch::Encryption(pair) = matched else {
            panic!("expected encryption pair");
        };
        assert_eq!(pair.decrypt(&blob).unwrap(), b"sealed before rotation");
    }

    #[test]
    fn test_same_second_rotations_keep_both_archives() {
        let ctx = ctx();
        let mut service = unlocked_service();

        let first_fp = service.encryption_public_key().unwrap().fingerprint();
        let first_blob = service.encrypt(b"first generation").unwrap();
        let retired = service.rotate_keys(1000).unwrap();
        archive_retired(&ctx, &service, &retired, 1000).unwrap();

        let second_fp = service.encryption_public_key().unwrap().fingerprint();
        let second_blob = service.encrypt(b"second generation").unwrap();
        let retired = service.rotate_keys(1000).unwrap();
        archive_retired(&ctx, &service, &retired, 1000).unwrap();

        // Both generations share the archive timestamp; each must still
        // resolve to its own pair.
        for (fp, blob, plaintext) in [
            (first_fp, first_blob, b"first generation".as_slice()),
            (second_fp, second_blob, b"second generation".as_slice()),
        ] {
            let KeyMatch::Encryption(pair) = lookup_archived(&ctx, &service, "svc-1", &fp, true)
                .unwrap()
                .unwrap()
            else {
                panic!("expected encryption pair");
            };
            assert_eq!(pair.decrypt(&blob).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_pointer_to_foreign_record_is_rejected() {
        let ctx = ctx();
        let mut service = unlocked_service();
        let real_fp = service.encryption_public_key().unwrap().fingerprint();
        let retired = service.rotate_keys(1000).unwrap();
        archive_retired(&ctx, &service, &retired, 1000).unwrap();

        // A pointer for some other fingerprint aimed at the real record.
        let bogus_fp = Fingerprint::from("feedface");
        ctx.store()
            .set_bytes(
                &fingerprint_pointer_key("svc-1", &bogus_fp),
                archive_record_key("svc-1", 1000, &real_fp).as_bytes(),
            )
            .unwrap();

        let err = lookup_archived(&ctx, &service, "svc-1", &bogus_fp, true).unwrap_err();
        assert!(matches!(err, IdentityError::KeyManipulation(_)));
    }

    #[test]
    fn test_lookup_unknown_fingerprint_is_none() {
        let ctx = ctx();
        let service = unlocked_service();
        let matched =
            lookup_archived(&ctx, &service, "svc-1", &Fingerprint::from("nope"), false).unwrap();
        assert!(matched.is_none());
    }

    #[test]
    fn test_dangling_pointer_is_key_manipulation_error() {
        let ctx = ctx();
        let service = unlocked_service();
        let fp = Fingerprint::from("deadbeef");
        ctx.store()
            .set_bytes(
                &fingerprint_pointer_key("svc-1", &fp),
                b"keys/svc-1/archive/1/encryption",
            )
            .unwrap();
        let err = lookup_archived(&ctx, &service, "svc-1", &fp, false).unwrap_err();
        assert!(matches!(err, IdentityError::KeyManipulation(_)));
    }

    #[test]
    fn test_identity_record_store_and_load() {
        let ctx = ctx();
        let service = unlocked_service();
        store_identity_record(&ctx, &service).unwrap();

        let loaded = load_identity_record(&ctx, ServiceType::Compute)
            .unwrap()
            .unwrap();
        assert!(loaded.is_locked());
        assert_eq!(loaded.uid(), Some("svc-1"));
        assert_eq!(
            loaded.encryption_public_key(),
            service.encryption_public_key()
        );

        // Second load comes from the cache.
        assert!(ctx
            .cached_service_info(&identity_record_key(ServiceType::Compute))
            .is_some());
        assert!(load_identity_record(&ctx, ServiceType::Compute)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_store_identity_record_invalidates_cache() {
        let ctx = ctx();
        let mut service = unlocked_service();
        store_identity_record(&ctx, &service).unwrap();
        load_identity_record(&ctx, ServiceType::Compute).unwrap();

        service.rotate_keys(5).unwrap();
        store_identity_record(&ctx, &service).unwrap();

        let loaded = load_identity_record(&ctx, ServiceType::Compute)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.last_key_update(), Some(5));
    }
}
