//! Data models for the compliance subsystem
//!
//! Validation results, audit log entries and trend snapshots. Everything
//! here serializes with camelCase field names so that exported reports keep
//! a stable shape.

pub mod audit;
pub mod trend;
pub mod validation;

pub use audit::{Actor, ActorFilter, AuditAction, AuditLog, AuditLogEntry, AuditStats, GroupAuditStats};
pub use trend::*;
pub use validation::*;

use uuid::Uuid;

/// Generate a new UUID for model IDs
pub fn generate_id() -> Uuid {
    Uuid::new_v4()
}
