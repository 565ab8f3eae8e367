//! # veto-audit
//!
//! Append-only, hash-chained audit log for every Veto safety decision.
//!
//! Each governance component writes its denials, committed changes,
//! approval outcomes and status transitions here. Records are sealed with
//! a blake3 hash over the previous record's hash and the record's own
//! canonical JSON, so a forensic replay can detect edits, reordering and
//! dropped rows via [`AuditSink::verify_chain`].
//!
//! Audit durability never influences a safety decision: call sites write
//! through [`record_or_warn`], which logs and drops storage failures.

#![deny(unsafe_code)]

pub mod error;
pub mod jsonl;
pub mod memory;
pub mod model;

pub use error::{AuditError, AuditResult};
pub use jsonl::JsonlAuditLog;
pub use memory::{InMemoryAuditLog, NullAuditLog};
pub use model::{verify_records, AuditEntry, AuditRecord, AuditTable, QueryWindow};

/// Storage contract for the audit trail.
///
/// Implementations must be append-only: records are never updated or
/// removed once sealed.
pub trait AuditSink: Send + Sync {
    /// Seal `entry` onto the end of the chain.
    fn append(&self, entry: AuditEntry) -> AuditResult<AuditRecord>;

    /// Records newest first, optionally restricted to one table.
    fn list(&self, table: Option<AuditTable>, window: QueryWindow) -> AuditResult<Vec<AuditRecord>>;

    /// Every record in sequence order.
    fn all(&self) -> AuditResult<Vec<AuditRecord>>;

    fn len(&self) -> usize {
        self.all().map(|r| r.len()).unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute every hash and check sequence continuity.
    fn verify_chain(&self) -> AuditResult<()> {
        verify_records(&self.all()?)
    }
}

/// Append an entry, logging and discarding any storage failure.
pub fn record_or_warn(sink: &dyn AuditSink, entry: AuditEntry) -> Option<AuditRecord> {
    let table = entry.table;
    match sink.append(entry) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(table = %table, error = %e, "audit append failed");
            None
        }
    }
}
