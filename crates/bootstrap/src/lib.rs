//! Trust bootstrap and admin authorization for TrustPlane.
//!
//! This crate takes a bare node to a trusted member of the federation:
//! constructing the service account (stage1 keys, registry-assigned uid,
//! internal service user) and maintaining the administrator registry that
//! gates privileged operations. The first administrator self-registers;
//! every later one must be vouched for by an existing administrator's
//! signature.

pub mod admin;
pub mod error;
pub mod setup;

pub use admin::{
    is_admin, load_admin_registry, register_admin, verify_admin_signature, AdminRecord,
    AdminRegistry, ADMIN_LEASE_KEY, ADMIN_REGISTRY_KEY, FIRST_ADMIN_MARKER,
};
pub use error::{register_fault_kinds, BootstrapError, Result};
pub use setup::{
    directory_record_key, ensure_service_user, handle_register_service, setup_lease_key,
    setup_service, SetupOutcome, SetupRequest, FN_REGISTER_SERVICE,
};
