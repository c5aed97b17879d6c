//! Shared helpers for multi-service scenarios.
//!
//! Each simulated node gets its own [`ProcessContext`] (its own store and
//! leases); nodes talk through a shared [`InMemoryTransport`] routing
//! canonical URLs to [`serve_call`] handlers.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use trustplane_bootstrap::{handle_register_service, BootstrapError, FN_REGISTER_SERVICE};
use trustplane_core::context::ProcessContext;
use trustplane_core::lease::MemoryLeases;
use trustplane_core::store::MemoryStore;
use trustplane_envelope::{Fault, FaultRegistry, InMemoryTransport};
use trustplane_identity::{serve_call, Service, FN_GET_SERVICE};

pub const LEASE_TTL: Duration = Duration::from_secs(5);
pub const CALL_TIMEOUT: Duration = Duration::from_secs(1);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Fresh per-node context: empty store, in-process leases.
pub fn fresh_ctx() -> Arc<ProcessContext> {
    Arc::new(ProcessContext::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLeases::new(Duration::from_millis(500))),
    ))
}

/// Fault registry with every TrustPlane fault kind registered.
pub fn full_registry() -> FaultRegistry {
    let mut registry = FaultRegistry::with_defaults();
    trustplane_identity::register_fault_kinds(&mut registry);
    trustplane_bootstrap::register_fault_kinds(&mut registry);
    registry
}

/// Route a service's canonical URL to a standard handler answering
/// `get_service` and `register_service`. The service is read per request,
/// so key rotations are visible to later calls.
pub fn route_service(
    transport: &InMemoryTransport,
    service: Arc<RwLock<Service>>,
    ctx: &Arc<ProcessContext>,
) {
    let ctx = Arc::clone(ctx);
    let url = service
        .read()
        .expect("service lock poisoned")
        .canonical_url()
        .to_string();
    transport.route(url, move |bytes| {
        let current = service.read().expect("service lock poisoned").clone();
        serve_call(&current, &ctx, bytes, &|function, payload| match function {
            Some(FN_GET_SERVICE) => Ok(Some(
                serde_json::to_value(current.locked_view()).expect("record serializes"),
            )),
            Some(FN_REGISTER_SERVICE) => handle_register_service(&ctx, payload)
                .map(Some)
                .map_err(|e| Fault::from(&e)),
            Some("echo") => Ok(Some(serde_json::json!({ "echo": payload }))),
            other => Err(Fault::from(&BootstrapError::MissingService(format!(
                "unknown function {other:?}"
            )))),
        })
    });
}
