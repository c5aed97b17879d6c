//! Service account construction.
//!
//! Setup takes a node from nothing to a registered service identity:
//! create stage1 key material, obtain a final uid from the registry
//! service, mint the internal service-user account, and persist the
//! identity record. The whole sequence runs under the identity-record
//! lease, and a stage1 record left behind by a concurrent (or crashed)
//! setup is surfaced instead of silently overwritten.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use trustplane_core::context::ProcessContext;
use trustplane_core::service_type::{canonical_service_url, ServiceType};
use trustplane_core::store::ObjectStore;
use trustplane_crypto::random_passphrase;
use trustplane_identity::{keystore, CallOptions, Service, ServiceClient};

use crate::error::{BootstrapError, Result};

/// Function a registry service exposes to hand out final uids.
pub const FN_REGISTER_SERVICE: &str = "register_service";

/// Store key of a registered service's directory record.
pub fn directory_record_key(uid: &str) -> String {
    format!("services/{uid}")
}

/// Lease key serializing setup for one service type.
pub fn setup_lease_key(service_type: ServiceType) -> String {
    format!("lease/{}", keystore::identity_record_key(service_type))
}

/// How setup concluded.
#[derive(Debug)]
pub enum SetupOutcome {
    /// A fresh identity was constructed and registered; the service is
    /// unlocked and its record is persisted.
    Created(Service),
    /// A matching identity record already existed; returned locked.
    Existing(Service),
}

/// Everything setup needs for one service.
pub struct SetupRequest<'a> {
    pub service_type: ServiceType,
    pub url: &'a str,
    pub lease_ttl: Duration,
    /// Registry peer to obtain the final uid from. `None` means this node
    /// assigns its own uid (registry services and standalone nodes).
    pub registry: Option<(&'a ServiceClient, &'a Service)>,
}

/// Construct (or find) the service account for this node.
pub fn setup_service(ctx: &ProcessContext, req: SetupRequest<'_>) -> Result<SetupOutcome> {
    let guard = ctx
        .leases()
        .acquire(&setup_lease_key(req.service_type), req.lease_ttl)?;

    // Read the store directly: a concurrent setup's write may postdate the
    // process cache.
    if let Some(existing) = keystore::load_identity_record_uncached(ctx, req.service_type)? {
        if existing.is_stage1() {
            return Err(BootstrapError::ServiceAccount(format!(
                "construction of the {} service account is already in progress",
                req.service_type
            )));
        }
        let expected_url = canonical_service_url(req.url, Some(req.service_type));
        if existing.canonical_url() != expected_url {
            return Err(BootstrapError::ServiceAccount(format!(
                "a {} service account already exists for '{}', refusing to rebuild it for '{}'",
                req.service_type,
                existing.canonical_url(),
                expected_url
            )));
        }
        info!(service_type = %req.service_type, "service account already exists");
        return Ok(SetupOutcome::Existing(existing));
    }

    let mut service = Service::create(req.service_type, req.url);
    // Persist the stage1 record first so a crashed setup is visible.
    keystore::store_identity_record(ctx, &service)?;

    let uid = match req.registry {
        Some((client, registry_peer)) => {
            match register_with_registry(client, registry_peer, &service) {
                Ok(uid) => uid,
                Err(e) => {
                    // Roll back the stage1 record so a later setup can retry.
                    ctx.store()
                        .delete(&keystore::identity_record_key(req.service_type))?;
                    ctx.invalidate_service_caches();
                    return Err(e);
                }
            }
        }
        None => {
            warn!(
                service_type = %req.service_type,
                "no registry peer configured, self-assigning uid"
            );
            format!("svc-{}", Uuid::new_v4())
        }
    };
    service.assign_uid(&uid)?;

    ensure_service_user(&mut service)?;
    keystore::store_identity_record(ctx, &service)?;
    info!(service_type = %req.service_type, uid, "service account constructed");
    guard.release();
    Ok(SetupOutcome::Created(service))
}

fn register_with_registry(
    client: &ServiceClient,
    registry_peer: &Service,
    service: &Service,
) -> Result<String> {
    let opts = CallOptions {
        encrypt: registry_peer.encryption_public_key().is_some(),
        sign_response: registry_peer.signing_certificate().is_some(),
        registry: None,
    };
    let reply = client.call(
        registry_peer,
        FN_REGISTER_SERVICE,
        serde_json::to_value(service.locked_view())?,
        &opts,
    )?;
    reply
        .get("uid")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            BootstrapError::MissingService(format!(
                "registry at '{}' returned no uid: {reply}",
                registry_peer.canonical_url()
            ))
        })
}

/// Mint the internal service-user account if the service has none: a fresh
/// uid, a deterministic name, and credentials sealed to the skeleton key.
pub fn ensure_service_user(service: &mut Service) -> Result<()> {
    if service.service_user_uid().is_some() {
        return Ok(());
    }
    let user_uid = format!("user-{}", Uuid::new_v4());
    let name = format!("{}-service-user", service.service_type());
    let secrets = service.seal_secret(random_passphrase().as_bytes())?;
    service.set_service_user(user_uid, name, secrets);
    Ok(())
}

/// Registry-side handler for [`FN_REGISTER_SERVICE`]: assign a final uid,
/// record the service in the directory, and return the uid.
pub fn handle_register_service(ctx: &ProcessContext, payload: Value) -> Result<Value> {
    let mut record: Service = serde_json::from_value(payload)?;
    if !record.is_stage1() && record.uid().is_some() {
        return Err(BootstrapError::ServiceAccount(format!(
            "service at '{}' is already registered as {:?}",
            record.canonical_url(),
            record.uid()
        )));
    }
    let uid = format!("svc-{}", Uuid::new_v4());
    record.assign_uid(&uid)?;
    ctx.store().set_json(
        &directory_record_key(&uid),
        &serde_json::to_value(&record)?,
    )?;
    info!(uid, url = record.canonical_url(), "registered service");
    Ok(json!({ "uid": uid }))
}
