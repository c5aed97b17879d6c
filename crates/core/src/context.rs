//! Process-wide context.
//!
//! The original design leaned on module-level mutable caches and a global
//! "am I a running service" counter. Those are replaced here by an explicit
//! [`ProcessContext`] handed to every entry point: it owns the store and
//! lease handles, the process-local caches, and the running-service counter
//! with push/pop semantics for test isolation.
//!
//! Cache discipline: caches give read-after-write consistency only for
//! writes made through the mutation APIs. Any mutation of the identity
//! record or the admin registry, and any store swap, must invalidate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::lease::LeaseProvider;
use crate::store::ObjectStore;

/// Shared handles and caches for one process.
pub struct ProcessContext {
    store: RwLock<Arc<dyn ObjectStore>>,
    leases: Arc<dyn LeaseProvider>,
    service_info: Mutex<HashMap<String, Value>>,
    trusted_services: Mutex<HashMap<String, Value>>,
    admin_registry: Mutex<Option<Value>>,
    running: AtomicUsize,
}

impl ProcessContext {
    pub fn new(store: Arc<dyn ObjectStore>, leases: Arc<dyn LeaseProvider>) -> Self {
        Self {
            store: RwLock::new(store),
            leases,
            service_info: Mutex::new(HashMap::new()),
            trusted_services: Mutex::new(HashMap::new()),
            admin_registry: Mutex::new(None),
            running: AtomicUsize::new(0),
        }
    }

    /// Current object-store handle.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store.read().expect("store handle poisoned"))
    }

    /// Replace the backing store (isolated test runs swap in a fresh one).
    /// All caches are invalidated: they describe the old store's contents.
    pub fn swap_store(&self, store: Arc<dyn ObjectStore>) {
        *self.store.write().expect("store handle poisoned") = store;
        self.invalidate_caches();
        debug!("backing store swapped, caches invalidated");
    }

    pub fn leases(&self) -> Arc<dyn LeaseProvider> {
        Arc::clone(&self.leases)
    }

    // --- caches -----------------------------------------------------------

    pub fn cached_service_info(&self, key: &str) -> Option<Value> {
        self.service_info
            .lock()
            .expect("cache poisoned")
            .get(key)
            .cloned()
    }

    pub fn put_service_info(&self, key: &str, value: Value) {
        self.service_info
            .lock()
            .expect("cache poisoned")
            .insert(key.to_string(), value);
    }

    pub fn cached_trusted_service(&self, url: &str) -> Option<Value> {
        self.trusted_services
            .lock()
            .expect("cache poisoned")
            .get(url)
            .cloned()
    }

    pub fn put_trusted_service(&self, url: &str, value: Value) {
        self.trusted_services
            .lock()
            .expect("cache poisoned")
            .insert(url.to_string(), value);
    }

    pub fn cached_admin_registry(&self) -> Option<Value> {
        self.admin_registry.lock().expect("cache poisoned").clone()
    }

    pub fn put_admin_registry(&self, value: Value) {
        *self.admin_registry.lock().expect("cache poisoned") = Some(value);
    }

    /// Drop the identity-record and directory caches.
    pub fn invalidate_service_caches(&self) {
        self.service_info.lock().expect("cache poisoned").clear();
        self.trusted_services.lock().expect("cache poisoned").clear();
    }

    /// Drop the admin-registry cache.
    pub fn invalidate_admin_cache(&self) {
        *self.admin_registry.lock().expect("cache poisoned") = None;
    }

    /// Drop every process-local cache.
    pub fn invalidate_caches(&self) {
        self.invalidate_service_caches();
        self.invalidate_admin_cache();
    }

    // --- running-service counter ------------------------------------------

    /// Mark this process as serving inbound calls. Balanced by
    /// [`ProcessContext::pop_running`].
    pub fn push_running(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pop_running(&self) {
        let prev = self.running.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "pop_running without matching push_running");
    }

    pub fn is_running_service(&self) -> bool {
        self.running.load(Ordering::SeqCst) > 0
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
