//! Administrator registry.
//!
//! Admins are the accounts allowed to perform privileged operations across
//! the federation. The registry is a single store record mutated only under
//! its lease. The first admin self-registers (there is nobody yet who could
//! vouch for them); every later admin must present a signature over their
//! account id made by an already-listed admin's signing key.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use trustplane_core::context::ProcessContext;
use trustplane_core::store::ObjectStore;
use trustplane_core::time::now_secs;
use trustplane_crypto::SigningCert;

use crate::error::{BootstrapError, Result};

/// Store key of the admin registry record.
pub const ADMIN_REGISTRY_KEY: &str = "admin/users";

/// Lease key serializing admin-registry mutation.
pub const ADMIN_LEASE_KEY: &str = "lease/admin/users";

/// Marker recorded for the self-registered first admin.
pub const FIRST_ADMIN_MARKER: &str = "first admin";

/// One registered administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminRecord {
    pub account: String,
    pub signing_certificate: SigningCert,
    /// Account of the admin who vouched, or [`FIRST_ADMIN_MARKER`].
    pub authorised_by: String,
    pub added_at: u64,
}

/// The full registry, keyed by account id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminRegistry {
    pub admins: BTreeMap<String, AdminRecord>,
}

impl AdminRegistry {
    pub fn is_empty(&self) -> bool {
        self.admins.is_empty()
    }

    pub fn get(&self, account: &str) -> Option<&AdminRecord> {
        self.admins.get(account)
    }
}

fn read_registry_uncached(ctx: &ProcessContext) -> Result<AdminRegistry> {
    match ctx.store().get_json(ADMIN_REGISTRY_KEY)? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(AdminRegistry::default()),
    }
}

/// Load the admin registry through the process cache.
pub fn load_admin_registry(ctx: &ProcessContext) -> Result<AdminRegistry> {
    if let Some(cached) = ctx.cached_admin_registry() {
        return Ok(serde_json::from_value(cached)?);
    }
    let registry = read_registry_uncached(ctx)?;
    ctx.put_admin_registry(serde_json::to_value(&registry)?);
    Ok(registry)
}

/// Register an administrator account.
///
/// `sponsorship` is `(sponsor_account, signature)` where the signature
/// covers the candidate's account id bytes. It is required for every admin
/// after the first: on an empty registry the candidate self-registers and is
/// recorded as vouched for by [`FIRST_ADMIN_MARKER`].
pub fn register_admin(
    ctx: &ProcessContext,
    lease_ttl: Duration,
    account: &str,
    certificate: &SigningCert,
    sponsorship: Option<(&str, &[u8])>,
) -> Result<()> {
    let guard = ctx.leases().acquire(ADMIN_LEASE_KEY, lease_ttl)?;

    // Re-read under the lease: a concurrent worker may have registered the
    // first admin (or this one) while we waited.
    let mut registry = read_registry_uncached(ctx)?;

    if registry.admins.contains_key(account) {
        return Err(BootstrapError::Permission(format!(
            "account '{account}' is already a registered administrator"
        )));
    }

    let authorised_by = if registry.is_empty() {
        info!(account, "registering first administrator");
        FIRST_ADMIN_MARKER.to_string()
    } else {
        let Some((sponsor, signature)) = sponsorship else {
            return Err(BootstrapError::Permission(format!(
                "registering '{account}' requires authorization by an existing administrator"
            )));
        };
        let Some(sponsor_record) = registry.get(sponsor) else {
            return Err(BootstrapError::Permission(format!(
                "sponsor '{sponsor}' is not a registered administrator"
            )));
        };
        sponsor_record
            .signing_certificate
            .verify(account.as_bytes(), signature)
            .map_err(|e| {
                BootstrapError::Permission(format!(
                    "sponsor signature for '{account}' did not verify: {e}"
                ))
            })?;
        info!(account, sponsor, "registering administrator");
        sponsor.to_string()
    };

    registry.admins.insert(
        account.to_string(),
        AdminRecord {
            account: account.to_string(),
            signing_certificate: certificate.clone(),
            authorised_by,
            added_at: now_secs(),
        },
    );
    ctx.store()
        .set_json(ADMIN_REGISTRY_KEY, &serde_json::to_value(&registry)?)?;
    ctx.invalidate_admin_cache();
    guard.release();
    Ok(())
}

/// Whether `account` is a registered administrator.
pub fn is_admin(ctx: &ProcessContext, account: &str) -> Result<bool> {
    Ok(load_admin_registry(ctx)?.get(account).is_some())
}

/// Verify that `signature` over `message` was made by the listed admin
/// `account`. The gate for every admin-authorized operation.
pub fn verify_admin_signature(
    ctx: &ProcessContext,
    account: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let registry = load_admin_registry(ctx)?;
    let Some(record) = registry.get(account) else {
        return Err(BootstrapError::Permission(format!(
            "'{account}' is not a registered administrator"
        )));
    };
    record
        .signing_certificate
        .verify(message, signature)
        .map_err(|e| {
            BootstrapError::Permission(format!("admin signature did not verify: {e}"))
        })
}
