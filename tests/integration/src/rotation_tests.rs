//! Key-rotation scenarios: rotating services keep serving callers holding
//! old keys, locked peers adopt rotations pinned to the previously trusted
//! certificate, and impostors fail that pin.

use std::sync::{Arc, RwLock};

use serde_json::json;

use trustplane_bootstrap::{setup_service, SetupOutcome, SetupRequest};
use trustplane_core::service_type::ServiceType;
use trustplane_core::time::now_secs;
use trustplane_envelope::InMemoryTransport;
use trustplane_identity::{
    refresh_local, rotate_now, CallOptions, IdentityError, KeyMatch, Service, ServiceClient,
};

use crate::test_utils::{fresh_ctx, init_tracing, route_service, CALL_TIMEOUT, LEASE_TTL};

fn storage_node() -> (Arc<trustplane_core::context::ProcessContext>, Service) {
    let ctx = fresh_ctx();
    let SetupOutcome::Created(service) = setup_service(
        &ctx,
        SetupRequest {
            service_type: ServiceType::Storage,
            url: "https://storage.example.com",
            lease_ttl: LEASE_TTL,
            registry: None,
        },
    )
    .unwrap() else {
        panic!("expected Created");
    };
    (ctx, service)
}

#[test]
fn test_stale_caller_is_served_across_rotations() {
    init_tracing();

    let (server_ctx, server) = storage_node();
    let shared = Arc::new(RwLock::new(server.clone()));
    let transport = Arc::new(InMemoryTransport::new());
    route_service(&transport, Arc::clone(&shared), &server_ctx);

    // The caller fetches the record once, then the server rotates twice.
    let caller_ctx = fresh_ctx();
    let client = ServiceClient::new(transport, CALL_TIMEOUT);
    let mut peer = Service::remote_handle(ServiceType::Storage, "https://storage.example.com");
    client.refresh_from_peer(&caller_ctx, &mut peer).unwrap();

    {
        let mut server = shared.write().unwrap();
        assert!(rotate_now(&server_ctx, &mut server, LEASE_TTL).unwrap());
        assert!(rotate_now(&server_ctx, &mut server, LEASE_TTL).unwrap());
    }

    // The caller still encrypts to the twice-retired key; the server
    // resolves it from the archive and answers.
    let result = client
        .call(
            &peer,
            "echo",
            json!({"stale": true}),
            &CallOptions {
                encrypt: true,
                sign_response: false,
                registry: None,
            },
        )
        .unwrap();
    assert_eq!(result, json!({"echo": {"stale": true}}));
}

#[test]
fn test_locked_peer_adopts_rotation_pinned_to_old_cert() {
    init_tracing();

    let (server_ctx, server) = storage_node();
    let shared = Arc::new(RwLock::new(server.clone()));
    let transport = Arc::new(InMemoryTransport::new());
    route_service(&transport, Arc::clone(&shared), &server_ctx);

    let caller_ctx = fresh_ctx();
    let client = ServiceClient::new(transport, CALL_TIMEOUT);
    let mut peer = Service::remote_handle(ServiceType::Storage, "https://storage.example.com");
    client.refresh_from_peer(&caller_ctx, &mut peer).unwrap();
    let old_cert = peer.signing_certificate().unwrap().clone();

    {
        let mut server = shared.write().unwrap();
        rotate_now(&server_ctx, &mut server, LEASE_TTL).unwrap();
    }

    // The refresh demands a reply signed with the certificate the caller
    // already trusts; the server signs with its retired pair.
    client.refresh_from_peer(&caller_ctx, &mut peer).unwrap();
    assert_ne!(peer.signing_certificate().unwrap(), &old_cert);
    assert_eq!(
        peer.last_signing_certificate().unwrap(),
        &old_cert
    );
}

#[test]
fn test_impostor_fails_certificate_pin() {
    init_tracing();

    let (server_ctx, server) = storage_node();
    let transport = Arc::new(InMemoryTransport::new());
    route_service(
        &transport,
        Arc::new(RwLock::new(server.clone())),
        &server_ctx,
    );

    // Trust the genuine server first.
    let caller_ctx = fresh_ctx();
    let client = ServiceClient::new(transport.clone(), CALL_TIMEOUT);
    let mut peer = Service::remote_handle(ServiceType::Storage, "https://storage.example.com");
    client.refresh_from_peer(&caller_ctx, &mut peer).unwrap();

    // An impostor with fresh keys takes over the URL.
    let impostor_ctx = fresh_ctx();
    let impostor = Service::create(ServiceType::Storage, "https://storage.example.com");
    let impostor_transport = Arc::new(InMemoryTransport::new());
    route_service(
        &impostor_transport,
        Arc::new(RwLock::new(impostor)),
        &impostor_ctx,
    );

    let impostor_client = ServiceClient::new(impostor_transport, CALL_TIMEOUT);
    let err = impostor_client
        .refresh_from_peer(&caller_ctx, &mut peer)
        .unwrap_err();
    // The impostor cannot decrypt a request sealed to the genuine key, let
    // alone sign with the pinned certificate.
    assert!(matches!(err, IdentityError::Envelope(_)));
    // The caller's trusted record is unchanged.
    assert_eq!(peer.uid(), server.uid());
}

#[test]
fn test_refresh_local_honors_update_interval() {
    let (ctx, mut service) = storage_node();

    // Freshly set up: nothing to do.
    assert!(!refresh_local(&ctx, &mut service, LEASE_TTL).unwrap());

    // Shrink the interval so the last update is already stale.
    service.set_key_update_interval(0);
    let before = service.encryption_public_key().unwrap().fingerprint();
    std::thread::sleep(std::time::Duration::from_millis(1100));
    assert!(service.should_refresh(now_secs()));
    assert!(refresh_local(&ctx, &mut service, LEASE_TTL).unwrap());
    assert_ne!(
        service.encryption_public_key().unwrap().fingerprint(),
        before
    );
}

#[test]
fn test_dumped_keys_restore_into_rotated_service() {
    let (ctx, mut service) = storage_node();
    rotate_now(&ctx, &mut service, LEASE_TTL).unwrap();

    let snapshot_fp = service.encryption_public_key().unwrap().fingerprint();
    let blob = service.dump_keys(true).unwrap();

    rotate_now(&ctx, &mut service, LEASE_TTL).unwrap();
    assert_ne!(
        service.encryption_public_key().unwrap().fingerprint(),
        snapshot_fp
    );

    service.load_keys(&blob).unwrap();
    assert_eq!(
        service.encryption_public_key().unwrap().fingerprint(),
        snapshot_fp
    );

    // Keys archived before the snapshot still resolve.
    let KeyMatch::Encryption(_) = service
        .get_key(&ctx, &snapshot_fp, true)
        .unwrap() else {
        panic!("expected encryption pair");
    };
}
