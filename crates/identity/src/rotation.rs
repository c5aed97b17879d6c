//! Key rotation under a distributed lease.
//!
//! Rotation is serialized through a per-uid lease, with an optimistic
//! re-check of the stored record after acquisition: a concurrent worker may
//! have rotated while we waited, in which case this worker must not rotate
//! again.
//!
//! The commit order matters: archive the retired pairs first, then persist
//! the updated record, then adopt the new state in memory. A failure at any
//! step leaves the previous record authoritative.

use std::time::Duration;

use tracing::{debug, info};

use trustplane_core::context::ProcessContext;
use trustplane_core::time::now_secs;

use crate::error::Result;
use crate::keystore;
use crate::service::Service;

/// Rotate the service's keys if rotation is due. Returns whether a rotation
/// happened.
pub fn refresh_local(
    ctx: &ProcessContext,
    service: &mut Service,
    lease_ttl: Duration,
) -> Result<bool> {
    if !service.should_refresh(now_secs()) {
        debug!(uid = ?service.uid(), "key material is current, skipping rotation");
        return Ok(false);
    }
    rotate_now(ctx, service, lease_ttl)
}

/// Rotate unconditionally (modulo the concurrent-rotation re-check).
pub fn rotate_now(
    ctx: &ProcessContext,
    service: &mut Service,
    lease_ttl: Duration,
) -> Result<bool> {
    let uid = service.expect_uid()?.to_string();
    let guard = ctx
        .leases()
        .acquire(&keystore::rotation_lease_key(&uid), lease_ttl)?;

    // Another worker may have rotated while we waited on the lease. The
    // process cache may predate that write, so read the store directly.
    // Timestamps alone cannot see a same-second rotation; compare the
    // current key as well.
    if let Some(stored) = keystore::load_identity_record_uncached(ctx, service.service_type())? {
        let newer = stored.last_key_update() > service.last_key_update();
        let diverged = stored.encryption_public_key().is_some()
            && stored.encryption_public_key() != service.encryption_public_key();
        if newer || diverged {
            debug!(uid, "record was rotated concurrently, skipping");
            return Ok(false);
        }
    }

    let now = now_secs();
    let mut updated = service.clone();
    let retired = updated.rotate_keys(now)?;
    keystore::archive_retired(ctx, &updated, &retired, now)?;
    keystore::store_identity_record(ctx, &updated)?;
    *service = updated;

    info!(
        uid,
        encryption_fingerprint = %service
            .encryption_public_key()
            .map(|k| k.fingerprint().to_string())
            .unwrap_or_default(),
        "rotated service keys"
    );
    guard.release();
    Ok(true)
}
