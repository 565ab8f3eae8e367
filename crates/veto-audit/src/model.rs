use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuditError, AuditResult};

// ── Tables ──────────────────────────────────────────────────────────────

/// Logical append-only tables of the audit log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTable {
    /// Isolation denials.
    Violations,
    /// Rate-limit validations, reservations and committed changes.
    ChangeRequests,
    /// Behavioral metric snapshots.
    DriftMetrics,
    /// Drift and attachment alerts.
    DriftAlerts,
    /// Approval requests as created.
    ApprovalRequests,
    /// Terminal approval outcomes.
    ApprovalResponses,
    /// Subsystem status and safety status transitions.
    StatusHistory,
    /// Isolation, brakes, shutdowns.
    EmergencyActions,
    /// Coordinator incidents.
    Incidents,
}

impl std::fmt::Display for AuditTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Violations => "violations",
            Self::ChangeRequests => "change_requests",
            Self::DriftMetrics => "drift_metrics",
            Self::DriftAlerts => "drift_alerts",
            Self::ApprovalRequests => "approval_requests",
            Self::ApprovalResponses => "approval_responses",
            Self::StatusHistory => "status_history",
            Self::EmergencyActions => "emergency_actions",
            Self::Incidents => "incidents",
        };
        f.write_str(name)
    }
}

// ── Entries ─────────────────────────────────────────────────────────────

/// An event to append.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub table: AuditTable,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub subsystem: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub payload: Value,
}

impl AuditEntry {
    pub fn new(table: AuditTable, actor: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            table,
            timestamp: Utc::now(),
            actor: actor.into(),
            subsystem: None,
            summary: summary.into(),
            payload: Value::Null,
        }
    }

    pub fn subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach a serializable payload. Serialization failures degrade to
    /// a string description rather than dropping the entry.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload = serde_json::to_value(payload)
            .unwrap_or_else(|e| Value::String(format!("unserializable payload: {e}")));
        self
    }
}

/// A stored, hash-linked audit record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub sequence: u64,
    pub table: AuditTable,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub subsystem: Option<String>,
    pub summary: String,
    pub payload: Value,
    pub previous_hash: Option<String>,
    pub hash: String,
}

impl AuditRecord {
    /// Seal an entry onto the end of a chain.
    pub(crate) fn seal(
        entry: AuditEntry,
        sequence: u64,
        previous_hash: Option<String>,
    ) -> AuditResult<Self> {
        let hash = compute_hash(&entry, previous_hash.as_deref(), sequence)?;
        Ok(Self {
            id: format!("audit-{}", uuid::Uuid::new_v4()),
            sequence,
            table: entry.table,
            timestamp: entry.timestamp,
            actor: entry.actor,
            subsystem: entry.subsystem,
            summary: entry.summary,
            payload: entry.payload,
            previous_hash,
            hash,
        })
    }

    fn as_entry(&self) -> AuditEntry {
        AuditEntry {
            table: self.table,
            timestamp: self.timestamp,
            actor: self.actor.clone(),
            subsystem: self.subsystem.clone(),
            summary: self.summary.clone(),
            payload: self.payload.clone(),
        }
    }
}

/// Paged read window, newest first.
#[derive(Debug, Clone, Copy)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl Default for QueryWindow {
    fn default() -> Self {
        Self {
            limit: usize::MAX,
            offset: 0,
        }
    }
}

impl QueryWindow {
    pub fn latest(limit: usize) -> Self {
        Self { limit, offset: 0 }
    }

    pub(crate) fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

// ── Hash chain ──────────────────────────────────────────────────────────

fn compute_hash(
    entry: &AuditEntry,
    previous_hash: Option<&str>,
    sequence: u64,
) -> AuditResult<String> {
    let serializable = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "table": entry.table,
        "timestamp": entry.timestamp,
        "actor": entry.actor,
        "subsystem": entry.subsystem,
        "summary": entry.summary,
        "payload": entry.payload,
    });
    let serialized =
        serde_json::to_vec(&serializable).map_err(|e| AuditError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}

/// Verify that `records` (in sequence order) form an unbroken chain.
pub fn verify_records(records: &[AuditRecord]) -> AuditResult<()> {
    let mut previous: Option<&AuditRecord> = None;
    for record in records {
        let expected_sequence = previous.map(|p| p.sequence + 1).unwrap_or(1);
        if record.sequence != expected_sequence {
            return Err(AuditError::ChainBroken {
                sequence: record.sequence,
                reason: format!("expected sequence {expected_sequence}"),
            });
        }
        let expected_previous = previous.map(|p| p.hash.clone());
        if record.previous_hash != expected_previous {
            return Err(AuditError::ChainBroken {
                sequence: record.sequence,
                reason: "previous hash does not match predecessor".into(),
            });
        }
        let recomputed = compute_hash(
            &record.as_entry(),
            record.previous_hash.as_deref(),
            record.sequence,
        )?;
        if recomputed != record.hash {
            return Err(AuditError::ChainBroken {
                sequence: record.sequence,
                reason: "record contents do not match hash".into(),
            });
        }
        previous = Some(record);
    }
    Ok(())
}
