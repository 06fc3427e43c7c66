//! Error types shared across the compliance subsystem

/// Failures raised by a [`KeyValueStore`](crate::storage::KeyValueStore) implementation
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage quota exceeded writing '{key}' ({size} bytes, limit {limit})")]
    QuotaExceeded { key: String, size: usize, limit: usize },

    #[error("I/O error on key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}

/// Top-level error for validation, audit and trend operations
#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to persist audit log for subject '{subject_id}' after archival retry: {source}")]
    Persistence {
        subject_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed import: {reason}")]
    MalformedImport { reason: String },

    #[error("Subject '{subject_id}' already has an audit log; import requires an empty subject")]
    ImportConflict { subject_id: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Hashing failed: {0}")]
    Hash(String),

    #[error("Debounced validation requires a running tokio runtime")]
    NoRuntime,
}

/// Result type for compliance operations
pub type ComplianceResult<T> = Result<T, ComplianceError>;
