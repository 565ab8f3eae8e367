//! In-memory and no-op audit backends.
//!
//! The in-memory adapter is deterministic and test-friendly. Deployments
//! that need forensic replay across restarts should use
//! [`crate::JsonlAuditLog`].

use std::sync::RwLock;

use crate::error::{AuditError, AuditResult};
use crate::model::{AuditEntry, AuditRecord, AuditTable, QueryWindow};
use crate::AuditSink;

/// In-memory append-only audit log.
#[derive(Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn append(&self, entry: AuditEntry) -> AuditResult<AuditRecord> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| AuditError::Backend("audit lock poisoned".to_string()))?;

        let previous_hash = guard.last().map(|r| r.hash.clone());
        let sequence = guard.len() as u64 + 1;
        let record = AuditRecord::seal(entry, sequence, previous_hash)?;
        guard.push(record.clone());
        Ok(record)
    }

    fn list(&self, table: Option<AuditTable>, window: QueryWindow) -> AuditResult<Vec<AuditRecord>> {
        let guard = self
            .records
            .read()
            .map_err(|_| AuditError::Backend("audit lock poisoned".to_string()))?;
        let values: Vec<AuditRecord> = guard
            .iter()
            .rev()
            .filter(|r| table.map_or(true, |t| r.table == t))
            .cloned()
            .collect();
        Ok(window.apply(values))
    }

    fn all(&self) -> AuditResult<Vec<AuditRecord>> {
        let guard = self
            .records
            .read()
            .map_err(|_| AuditError::Backend("audit lock poisoned".to_string()))?;
        Ok(guard.clone())
    }
}

/// Audit sink that discards everything.
#[derive(Default)]
pub struct NullAuditLog;

impl AuditSink for NullAuditLog {
    fn append(&self, entry: AuditEntry) -> AuditResult<AuditRecord> {
        AuditRecord::seal(entry, 0, None)
    }

    fn list(&self, _table: Option<AuditTable>, _window: QueryWindow) -> AuditResult<Vec<AuditRecord>> {
        Ok(Vec::new())
    }

    fn all(&self) -> AuditResult<Vec<AuditRecord>> {
        Ok(Vec::new())
    }
}
