//! Object-store seam.
//!
//! The only durable shared state in a TrustPlane federation lives behind
//! [`ObjectStore`]: identity records, archived key material, and the admin
//! registry. Production deployments plug in a real backend; tests and
//! single-node runs use [`MemoryStore`].

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;

use crate::error::StoreError;

/// Key/value object store keyed by slash-separated paths.
///
/// Implementations must be safe for concurrent use; cross-invocation
/// exclusivity is the lease mutex's job, not the store's.
pub trait ObjectStore: Send + Sync {
    /// Fetch raw bytes, `None` when the key is absent.
    fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store raw bytes, overwriting any existing value.
    fn set_bytes(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// List all keys beginning with `prefix`, in lexicographic order.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Fetch and decode a JSON record.
    fn get_json(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.get_bytes(key)? {
            None => Ok(None),
            Some(bytes) => {
                let value =
                    serde_json::from_slice(&bytes).map_err(|e| StoreError::Malformed {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(value))
            }
        }
    }

    /// Encode and store a JSON record.
    fn set_json(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.set_bytes(key, &bytes)
    }
}

/// In-memory object store for tests and single-node use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryStore {
    fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))?
            .get(key)
            .cloned())
    }

    fn set_bytes(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))?
            .remove(key);
        Ok(())
    }
}
