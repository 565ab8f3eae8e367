use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veto_types::{RiskLevel, Severity};

/// Map a risk ratio onto the four-step scale.
///
/// `< 1.0` LOW, `> 1.5` HIGH, `> 2.0` CRITICAL, MEDIUM otherwise.
pub fn risk_level_for(score: f64) -> RiskLevel {
    if score > 2.0 {
        Severity::Critical
    } else if score > 1.5 {
        Severity::High
    } else if score < 1.0 {
        Severity::Low
    } else {
        Severity::Medium
    }
}

// ── Validation result ───────────────────────────────────────────────────

/// Immutable outcome of a change validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeValidationResult {
    pub approved: bool,
    pub reason: String,
    pub subsystem: String,
    pub kind: String,
    pub magnitude: f64,
    /// Magnitude already counted against today's budget, reservations included.
    pub cumulative_today: f64,
    pub proposed_new_total: f64,
    /// A magnitude that would fit, when one exists.
    pub adjusted_magnitude: Option<f64>,
    /// Seconds until the burst window frees a slot.
    pub cooldown_remaining: Option<u64>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub alternatives: Vec<String>,
    /// Budget held for this change until committed, released or expired.
    pub reservation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeValidationResult {
    pub(crate) fn rejected(
        subsystem: &str,
        kind: &str,
        magnitude: f64,
        reason: impl Into<String>,
        risk_level: RiskLevel,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
            subsystem: subsystem.to_string(),
            kind: kind.to_string(),
            magnitude,
            cumulative_today: 0.0,
            proposed_new_total: magnitude,
            adjusted_magnitude: None,
            cooldown_remaining: None,
            risk_score: 0.0,
            risk_level,
            requires_approval: risk_level.is_elevated(),
            alternatives: Vec::new(),
            reservation_id: None,
            timestamp,
        }
    }

    pub(crate) fn with_alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }
}

/// A change confirmed through `record_approved_change` or `commit_reservation`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommittedChange {
    pub subsystem: String,
    pub kind: String,
    pub magnitude: f64,
    pub timestamp: DateTime<Utc>,
    pub reservation_id: Option<String>,
    pub cumulative_after: f64,
}

/// Logged when a change crosses the risk escalation threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskEscalation {
    pub timestamp: DateTime<Utc>,
    pub subsystem: String,
    pub kind: String,
    pub requester: String,
    pub magnitude: f64,
    pub projected_total: f64,
    pub threshold: f64,
    pub risk_level: RiskLevel,
}

/// A rejected validation, kept for the report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub timestamp: DateTime<Utc>,
    pub subsystem: String,
    pub kind: String,
    pub magnitude: f64,
    pub reason: String,
    pub risk_level: RiskLevel,
}

// ── Brakes ──────────────────────────────────────────────────────────────

/// An engaged emergency brake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrakeStatus {
    pub subsystem: String,
    pub reason: String,
    pub engaged_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BrakeStatus {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| now < expires)
    }
}

// ── Report ──────────────────────────────────────────────────────────────

/// Per-key budget utilization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyUtilization {
    pub subsystem: String,
    pub kind: String,
    pub cumulative_today: f64,
    pub max_daily_change: f64,
    /// `cumulative_today / max_daily_change`.
    pub utilization: f64,
    pub pending_reservations: usize,
    pub changes_last_24h: usize,
    pub last_change: Option<DateTime<Utc>>,
    pub in_cooldown: bool,
    /// Limits are currently below their configured values.
    pub tightened: bool,
}

/// Aggregate rate limiter status for the coordinator tick.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RateLimiterReport {
    pub generated_at: Option<DateTime<Utc>>,
    pub keys: Vec<KeyUtilization>,
    pub active_brakes: Vec<BrakeStatus>,
    pub rejections_last_hour: usize,
    pub escalations_last_24h: usize,
}

impl RateLimiterReport {
    /// Keys at or above `threshold` utilization.
    pub fn saturated(&self, threshold: f64) -> Vec<&KeyUtilization> {
        self.keys
            .iter()
            .filter(|k| k.utilization >= threshold)
            .collect()
    }
}

/// Outcome of rebuilding ledgers from the audit log.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub changes_restored: usize,
    pub changes_skipped: usize,
    pub brakes_restored: usize,
}
