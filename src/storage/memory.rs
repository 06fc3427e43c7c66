use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StoreError;
use crate::sync::{read, write};
use super::KeyValueStore;

/// In-process store, optionally bounded by a per-value size quota
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    max_value_bytes: Option<usize>,
}

impl MemoryStore {
    /// Create an unbounded memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects any single value larger than `max_value_bytes`
    pub fn with_quota(max_value_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_value_bytes: Some(max_value_bytes),
        }
    }

    /// List stored keys beginning with `prefix`, sorted
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let entries = read(&self.entries);
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = read(&self.entries);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if let Some(limit) = self.max_value_bytes {
            if value.len() > limit {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    size: value.len(),
                    limit,
                });
            }
        }

        let mut entries = write(&self.entries);
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = write(&self.entries);
        entries.remove(key);
        Ok(())
    }
}
