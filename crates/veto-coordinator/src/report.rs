use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veto_drift::BehavioralReport;
use veto_isolation::IsolationIntegrity;
use veto_oversight::ApprovalStatistics;
use veto_rate_limit::RateLimiterReport;
use veto_types::Severity;

use crate::config::CoordinatorSettings;
use crate::incident::{Incident, SafetyStatus};

/// Read-only snapshot of every component.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafetyReport {
    pub generated_at: DateTime<Utc>,
    pub status: SafetyStatus,
    pub isolation: IsolationIntegrity,
    /// `None` when there was no interaction history to analyze.
    pub behavior: Option<BehavioralReport>,
    pub rate_limits: RateLimiterReport,
    pub oversight: ApprovalStatistics,
    pub open_incidents: Vec<Incident>,
    pub recommendations: Vec<String>,
    /// A human should look at the system now.
    pub escalation_needed: bool,
}

impl SafetyReport {
    /// Highest severity among open incidents.
    pub fn worst_open_severity(&self) -> Option<Severity> {
        self.open_incidents.iter().map(|i| i.severity).max()
    }
}

pub(crate) fn recommendations(report: &SafetyReport, settings: &CoordinatorSettings) -> Vec<String> {
    let mut out = Vec::new();
    if report.status == SafetyStatus::EmergencyShutdown {
        out.push("emergency shutdown in effect: obtain a system_restore approval to recover".into());
    }
    for name in report
        .isolation
        .quarantined
        .iter()
        .chain(&report.isolation.isolated)
    {
        out.push(format!("investigate and restore isolated subsystem {name}"));
    }
    if report.isolation.critical_violations > 0 {
        out.push(format!(
            "review {} critical isolation violations from the last hour",
            report.isolation.critical_violations
        ));
    }
    if let Some(behavior) = &report.behavior {
        out.extend(behavior.recommendations.iter().cloned());
    }
    for key in report.rate_limits.saturated(settings.saturation_threshold) {
        out.push(format!(
            "{}/{} at {:.0}% of its daily budget; defer further changes",
            key.subsystem,
            key.kind,
            key.utilization * 100.0
        ));
    }
    for brake in &report.rate_limits.active_brakes {
        out.push(format!(
            "emergency brake on {}: {}",
            brake.subsystem, brake.reason
        ));
    }
    if report.oversight.pending > 0 {
        out.push(format!(
            "{} approval requests awaiting a reviewer",
            report.oversight.pending
        ));
    }
    if report.oversight.human_routed() >= settings.min_routed_approvals
        && report.oversight.timeout_rate >= settings.timeout_rate_threshold
    {
        out.push("approval timeouts are high; check reviewer availability".into());
    }
    out
}

pub(crate) fn escalation_needed(report: &SafetyReport) -> bool {
    report.status >= SafetyStatus::Critical
        || report
            .worst_open_severity()
            .is_some_and(|s| s == Severity::Critical)
        || report
            .behavior
            .as_ref()
            .is_some_and(|b| b.risk_level == Severity::Critical)
        || report.isolation.critical_violations > 0
}
