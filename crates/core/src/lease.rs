//! Distributed lease-mutex seam.
//!
//! Every inbound call may be served by an independent short-lived worker, so
//! critical sections (identity-record mutation, admin-registry writes, key
//! rotation) are serialized through a lease keyed by a shared-store path.
//! Leases carry a TTL so a crashed holder cannot deadlock the federation,
//! and acquisition waits a bounded time before failing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::LeaseError;

/// Exclusive lease on a key, released when dropped.
pub struct LeaseGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LeaseGuard {
    pub fn new(release: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            release: Some(release),
        }
    }

    /// Release the lease now instead of at end of scope.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseGuard").finish_non_exhaustive()
    }
}

/// Provider of distributed lease mutexes.
///
/// `acquire` blocks up to the provider's bounded wait; holders must re-read
/// any shared state after acquisition (optimistic re-check) because another
/// worker may have completed the critical section first.
pub trait LeaseProvider: Send + Sync {
    fn acquire(&self, key: &str, ttl: Duration) -> Result<LeaseGuard, LeaseError>;
}

/// In-process lease provider for tests and single-node use.
///
/// Expired leases are treated as released, matching the TTL semantics of a
/// store-backed lease.
pub struct MemoryLeases {
    held: Arc<Mutex<HashMap<String, (u64, Instant)>>>,
    next_token: AtomicU64,
    max_wait: Duration,
    poll_interval: Duration,
}

impl MemoryLeases {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
            max_wait,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn try_take(&self, key: &str, ttl: Duration) -> Result<Option<u64>, LeaseError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| LeaseError::Backend("lease table poisoned".to_string()))?;
        let now = Instant::now();
        if let Some((_, expiry)) = held.get(key) {
            if *expiry > now {
                return Ok(None);
            }
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        held.insert(key.to_string(), (token, now + ttl));
        Ok(Some(token))
    }
}

impl Default for MemoryLeases {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl LeaseProvider for MemoryLeases {
    fn acquire(&self, key: &str, ttl: Duration) -> Result<LeaseGuard, LeaseError> {
        let started = Instant::now();
        loop {
            if let Some(token) = self.try_take(key, ttl)? {
                let held = Arc::clone(&self.held);
                let key = key.to_string();
                return Ok(LeaseGuard::new(Box::new(move || {
                    if let Ok(mut held) = held.lock() {
                        // Only release our own lease; an expired lease may
                        // have been re-acquired by another worker.
                        if matches!(held.get(&key), Some((t, _)) if *t == token) {
                            held.remove(&key);
                        }
                    }
                })));
            }
            if started.elapsed() >= self.max_wait {
                return Err(LeaseError::Timeout {
                    key: key.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}
