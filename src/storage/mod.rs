//! Persisted key-value storage used by the audit log and trend tracker
//!
//! The core only needs get/set/remove by key. Values are opaque bytes;
//! callers serialize with serde_json.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;

/// Key prefix for live audit logs
pub const AUDIT_LOG_PREFIX: &str = "auditlog:";

/// Key prefix for trend histories
pub const TREND_PREFIX: &str = "trend:";

/// Minimal synchronous key-value contract
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Storage key for a subject's live audit log
pub fn audit_log_key(subject_id: &str) -> String {
    format!("{}{}", AUDIT_LOG_PREFIX, subject_id)
}

/// Storage key for an archive segment written at `timestamp_ms`
pub fn audit_archive_key(subject_id: &str, timestamp_ms: i64) -> String {
    format!("{}{}:archive:{}", AUDIT_LOG_PREFIX, subject_id, timestamp_ms)
}

/// Storage key for a subject's trend history
pub fn trend_key(subject_id: &str) -> String {
    format!("{}{}", TREND_PREFIX, subject_id)
}
