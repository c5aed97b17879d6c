//! Concurrency scenarios: racing workers must serialize through leases and
//! agree on a single winner.

use std::sync::Arc;
use std::thread;

use trustplane_bootstrap::{load_admin_registry, register_admin, BootstrapError, FIRST_ADMIN_MARKER};
use trustplane_core::lease::LeaseProvider;
use trustplane_crypto::SigningKeyPair;
use trustplane_identity::{rotation_lease_key, rotate_now, Service};
use trustplane_core::service_type::ServiceType;

use crate::test_utils::{fresh_ctx, LEASE_TTL};

#[test]
fn test_first_admin_race_has_one_winner() {
    let ctx = fresh_ctx();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let key = SigningKeyPair::generate();
                let account = format!("admin-{i}");
                register_admin(&ctx, LEASE_TTL, &account, &key.cert(), None).is_ok()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .filter(|won| *won)
        .count();

    // Exactly one self-registration can see the empty registry; everyone
    // else needed a sponsor and was refused.
    assert_eq!(winners, 1);

    let registry = load_admin_registry(&ctx).unwrap();
    assert_eq!(registry.admins.len(), 1);
    let only = registry.admins.values().next().unwrap();
    assert_eq!(only.authorised_by, FIRST_ADMIN_MARKER);
}

#[test]
fn test_sponsored_registrations_serialize_under_lease() {
    let ctx = fresh_ctx();
    let alice = SigningKeyPair::generate();
    register_admin(&ctx, LEASE_TTL, "alice", &alice.cert(), None).unwrap();

    // Several sponsored candidates race; all carry valid signatures, so all
    // must land, one at a time.
    let alice = Arc::new(alice);
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let ctx = Arc::clone(&ctx);
            let alice = Arc::clone(&alice);
            thread::spawn(move || {
                let key = SigningKeyPair::generate();
                let account = format!("admin-{i}");
                let signature = alice.sign(account.as_bytes());
                register_admin(
                    &ctx,
                    LEASE_TTL,
                    &account,
                    &key.cert(),
                    Some(("alice", &signature)),
                )
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread panicked").unwrap();
    }
    assert_eq!(load_admin_registry(&ctx).unwrap().admins.len(), 5);
}

#[test]
fn test_rotation_waits_for_lease_holder() {
    let ctx = fresh_ctx();
    let mut service = Service::create(ServiceType::Compute, "https://c.example.com");
    service.assign_uid("svc-race").unwrap();
    service.set_service_user("user-1", "compute-service-user", "00");

    // Hold the rotation lease briefly from another thread; rotation must
    // wait it out rather than fail or double-run.
    let guard = ctx
        .leases()
        .acquire(&rotation_lease_key("svc-race"), LEASE_TTL)
        .unwrap();
    let holder = thread::spawn(move || {
        thread::sleep(std::time::Duration::from_millis(100));
        drop(guard);
    });

    let rotated = rotate_now(&ctx, &mut service, LEASE_TTL).unwrap();
    holder.join().expect("thread panicked");
    assert!(rotated);
}

#[test]
fn test_duplicate_account_race_admits_once() {
    let ctx = fresh_ctx();
    let alice = SigningKeyPair::generate();
    register_admin(&ctx, LEASE_TTL, "alice", &alice.cert(), None).unwrap();
    let alice = Arc::new(alice);

    // Two workers race to register the same account with valid signatures.
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let alice = Arc::clone(&alice);
            thread::spawn(move || {
                let key = SigningKeyPair::generate();
                let signature = alice.sign(b"bob");
                register_admin(&ctx, LEASE_TTL, "bob", &key.cert(), Some(("alice", &signature)))
                    .is_ok()
            })
        })
        .collect();

    let admitted = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .filter(|won| *won)
        .count();
    assert_eq!(admitted, 1);

    let registry = load_admin_registry(&ctx).unwrap();
    assert_eq!(registry.admins.len(), 2);
    assert!(matches!(
        register_admin(
            &ctx,
            LEASE_TTL,
            "bob",
            &SigningKeyPair::generate().cert(),
            None
        )
        .unwrap_err(),
        BootstrapError::Permission(_)
    ));
}
