use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use veto_types::Severity;

// ── Taxonomy ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentType {
    IsolationBreach,
    BehavioralDrift,
    RateLimitViolation,
    UnauthorizedAccess,
    SystemInstability,
    HumanOversightFailure,
    CascadeFailure,
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IsolationBreach => "ISOLATION_BREACH",
            Self::BehavioralDrift => "BEHAVIORAL_DRIFT",
            Self::RateLimitViolation => "RATE_LIMIT_VIOLATION",
            Self::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
            Self::SystemInstability => "SYSTEM_INSTABILITY",
            Self::HumanOversightFailure => "HUMAN_OVERSIGHT_FAILURE",
            Self::CascadeFailure => "CASCADE_FAILURE",
        };
        f.write_str(s)
    }
}

/// Subsystem label for incidents that concern the whole core.
pub const SYSTEM_WIDE: &str = "system";

/// A detected condition, before dedup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncidentSignal {
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub subsystem: String,
    pub description: String,
    #[serde(default)]
    pub evidence: Value,
}

impl IncidentSignal {
    pub fn new(
        incident_type: IncidentType,
        severity: Severity,
        subsystem: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            incident_type,
            severity,
            subsystem: subsystem.into(),
            description: description.into(),
            evidence: Value::Null,
        }
    }

    pub fn evidence(mut self, evidence: Value) -> Self {
        self.evidence = evidence;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    Open,
    Resolved,
}

/// An accepted incident.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub subsystem: String,
    pub description: String,
    pub evidence: Value,
    pub detected_at: DateTime<Utc>,
    pub state: IncidentState,
    /// Playbook steps taken, in order.
    pub response_actions: Vec<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution: Option<String>,
}

impl Incident {
    pub(crate) fn open(id: String, signal: IncidentSignal, now: DateTime<Utc>) -> Self {
        Self {
            id,
            incident_type: signal.incident_type,
            severity: signal.severity,
            subsystem: signal.subsystem,
            description: signal.description,
            evidence: signal.evidence,
            detected_at: now,
            state: IncidentState::Open,
            response_actions: Vec::new(),
            resolved_at: None,
            resolved_by: None,
            resolution: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == IncidentState::Open
    }

    /// Same type and subsystem as `signal`.
    pub fn matches(&self, signal: &IncidentSignal) -> bool {
        self.incident_type == signal.incident_type && self.subsystem == signal.subsystem
    }
}

// ── Safety status ───────────────────────────────────────────────────────

/// Overall posture, ordered from calm to locked down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyStatus {
    Operational,
    Monitoring,
    ElevatedRisk,
    Critical,
    EmergencyShutdown,
}

impl std::fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Operational => "OPERATIONAL",
            Self::Monitoring => "MONITORING",
            Self::ElevatedRisk => "ELEVATED_RISK",
            Self::Critical => "CRITICAL",
            Self::EmergencyShutdown => "EMERGENCY_SHUTDOWN",
        };
        f.write_str(s)
    }
}

/// Status implied by the open incidents.
///
/// `shutdown` is the sticky emergency flag; only a human restore clears it.
pub fn compute_status<'a, I>(open: I, shutdown: bool) -> SafetyStatus
where
    I: IntoIterator<Item = &'a Incident>,
{
    if shutdown {
        return SafetyStatus::EmergencyShutdown;
    }
    let mut count = 0usize;
    let mut worst = None;
    for incident in open.into_iter().filter(|i| i.is_open()) {
        count += 1;
        worst = worst.max(Some(incident.severity));
    }
    match worst {
        Some(Severity::Critical) => SafetyStatus::Critical,
        Some(Severity::High) => SafetyStatus::ElevatedRisk,
        _ if count >= 3 => SafetyStatus::ElevatedRisk,
        Some(_) => SafetyStatus::Monitoring,
        None => SafetyStatus::Operational,
    }
}

/// A recorded change of [`SafetyStatus`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyStatusChange {
    pub timestamp: DateTime<Utc>,
    pub from: SafetyStatus,
    pub to: SafetyStatus,
    pub reason: String,
}
