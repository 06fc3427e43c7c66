// Audit Log Module
// Append-only, hash-chained event log per subject with retention, export and import

pub mod export;
pub mod hashing;
pub mod logger;

pub use export::{AuditExport, ExportMetadata, AUDIT_MODULE, EXPORT_FORMAT_VERSION};
pub use hashing::{rolling_hash, EntryHasher, HashAlgorithm};
pub use logger::{
    ArchiveSegment, AuditLogger, AutoFixChange, IntegrityFailure, IntegrityFailureKind, IntegrityReport,
    DEFAULT_MAX_LIVE_ENTRIES, WORKSPACE_MODULE,
};
