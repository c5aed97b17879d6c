//! End-to-end federation scenarios: bootstrap a registry, join a service
//! through it, make secure calls, and grow the administrator chain of trust.

use std::sync::{Arc, RwLock};

use serde_json::json;

use trustplane_bootstrap::{
    is_admin, load_admin_registry, register_admin, setup_service, BootstrapError, SetupOutcome,
    SetupRequest, FIRST_ADMIN_MARKER,
};
use trustplane_core::service_type::ServiceType;
use trustplane_core::store::ObjectStore;
use trustplane_crypto::SigningKeyPair;
use trustplane_envelope::{EnvelopeError, InMemoryTransport, ReconstructedFault};
use trustplane_identity::{CallOptions, IdentityError, Service, ServiceClient};

use crate::test_utils::{fresh_ctx, full_registry, init_tracing, route_service, CALL_TIMEOUT, LEASE_TTL};

fn created(outcome: SetupOutcome) -> Service {
    match outcome {
        SetupOutcome::Created(service) => service,
        SetupOutcome::Existing(_) => panic!("expected a freshly created service"),
    }
}

#[test]
fn test_bootstrap_registry_then_join_service() {
    init_tracing();

    // Stand up the registry node.
    let registry_ctx = fresh_ctx();
    let registry = created(
        setup_service(
            &registry_ctx,
            SetupRequest {
                service_type: ServiceType::Registry,
                url: "https://registry.example.com",
                lease_ttl: LEASE_TTL,
                registry: None,
            },
        )
        .unwrap(),
    );

    let transport = Arc::new(InMemoryTransport::new());
    route_service(
        &transport,
        Arc::new(RwLock::new(registry.clone())),
        &registry_ctx,
    );

    // Join a compute node through the registry.
    let client = ServiceClient::new(transport.clone(), CALL_TIMEOUT);
    let compute_ctx = fresh_ctx();
    let compute = created(
        setup_service(
            &compute_ctx,
            SetupRequest {
                service_type: ServiceType::Compute,
                url: "https://compute.example.com",
                lease_ttl: LEASE_TTL,
                registry: Some((&client, &registry.locked_view())),
            },
        )
        .unwrap(),
    );

    assert!(compute.uid().unwrap().starts_with("svc-"));
    assert!(!compute.is_stage1());
    assert!(compute.service_user_uid().is_some());

    // The registry's directory knows the new service.
    let directory_key = trustplane_bootstrap::directory_record_key(compute.uid().unwrap());
    assert!(registry_ctx
        .store()
        .get_json(&directory_key)
        .unwrap()
        .is_some());
}

#[test]
fn test_trust_on_first_use_then_encrypted_signed_calls() {
    init_tracing();

    let server_ctx = fresh_ctx();
    let server = created(
        setup_service(
            &server_ctx,
            SetupRequest {
                service_type: ServiceType::Storage,
                url: "https://storage.example.com",
                lease_ttl: LEASE_TTL,
                registry: None,
            },
        )
        .unwrap(),
    );

    let transport = Arc::new(InMemoryTransport::new());
    route_service(
        &transport,
        Arc::new(RwLock::new(server.clone())),
        &server_ctx,
    );

    // A fresh caller knows only the URL; the first fetch is unverified.
    let caller_ctx = fresh_ctx();
    let client = ServiceClient::new(transport, CALL_TIMEOUT);
    let mut peer = Service::remote_handle(ServiceType::Storage, "https://storage.example.com");
    assert!(peer.encryption_public_key().is_none());

    client.refresh_from_peer(&caller_ctx, &mut peer).unwrap();
    assert_eq!(peer.uid(), server.uid());

    // Now every call is encrypted and the reply signature is verified.
    let result = client
        .call(
            &peer,
            "echo",
            json!({"block": 7}),
            &CallOptions {
                encrypt: true,
                sign_response: true,
                registry: None,
            },
        )
        .unwrap();
    assert_eq!(result, json!({"echo": {"block": 7}}));
}

#[test]
fn test_admin_chain_of_trust() {
    let ctx = fresh_ctx();

    let alice = SigningKeyPair::generate();
    let bob = SigningKeyPair::generate();
    let carol = SigningKeyPair::generate();

    // Alice self-registers on the empty registry.
    register_admin(&ctx, LEASE_TTL, "alice", &alice.cert(), None).unwrap();

    // Bob needs Alice's signature over his account id.
    let signature = alice.sign(b"bob");
    register_admin(&ctx, LEASE_TTL, "bob", &bob.cert(), Some(("alice", &signature))).unwrap();

    // Carol is vouched for by Bob, not Alice.
    let signature = bob.sign(b"carol");
    register_admin(&ctx, LEASE_TTL, "carol", &carol.cert(), Some(("bob", &signature))).unwrap();

    let registry = load_admin_registry(&ctx).unwrap();
    assert_eq!(registry.get("alice").unwrap().authorised_by, FIRST_ADMIN_MARKER);
    assert_eq!(registry.get("bob").unwrap().authorised_by, "alice");
    assert_eq!(registry.get("carol").unwrap().authorised_by, "bob");

    // Nobody gets in without a sponsor anymore.
    let eve = SigningKeyPair::generate();
    let err = register_admin(&ctx, LEASE_TTL, "eve", &eve.cert(), None).unwrap_err();
    assert!(matches!(err, BootstrapError::Permission(_)));
    assert!(!is_admin(&ctx, "eve").unwrap());
}

#[test]
fn test_remote_fault_crosses_service_boundary_typed() {
    init_tracing();

    let server_ctx = fresh_ctx();
    let server = created(
        setup_service(
            &server_ctx,
            SetupRequest {
                service_type: ServiceType::Compute,
                url: "https://compute.example.com",
                lease_ttl: LEASE_TTL,
                registry: None,
            },
        )
        .unwrap(),
    );

    let transport = Arc::new(InMemoryTransport::new());
    route_service(
        &transport,
        Arc::new(RwLock::new(server.clone())),
        &server_ctx,
    );

    let registry = full_registry();
    let client = ServiceClient::new(transport, CALL_TIMEOUT);
    let err = client
        .call(
            &server.locked_view(),
            "no_such_function",
            json!({}),
            &CallOptions {
                encrypt: true,
                sign_response: false,
                registry: Some(&registry),
            },
        )
        .unwrap_err();

    // The fault arrives as the local error type it left as, annotated with
    // the function and service that raised it.
    let IdentityError::Envelope(EnvelopeError::RemoteCall {
        cause: Some(cause), ..
    }) = err
    else {
        panic!("expected a remote call error with a cause");
    };
    let fault = cause.downcast::<ReconstructedFault>().unwrap();
    assert_eq!(fault.class, "MissingServiceError");
    let inner = fault.cause().downcast_ref::<BootstrapError>().unwrap();
    assert!(matches!(inner, BootstrapError::MissingService(_)));
    assert!(fault.to_string().contains("no_such_function"));
    assert!(fault.to_string().contains("compute"));
}
