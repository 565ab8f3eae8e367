//! Incident response playbooks.
//!
//! Planning is pure: [`plan`] maps an incident to actions and the
//! coordinator executes them.

use serde::{Deserialize, Serialize};
use veto_types::Severity;

use crate::config::CoordinatorSettings;
use crate::incident::{Incident, IncidentType, SYSTEM_WIDE};

/// One step of an incident response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlaybookAction {
    /// Quarantine the subsystems through the isolation registry.
    EmergencyIsolate { subsystems: Vec<String> },
    /// Stop all changes on a subsystem for `duration_secs`.
    EngageBrake {
        subsystem: String,
        duration_secs: u64,
    },
    /// Scale rate limits on a subsystem down by `factor`.
    TightenLimits { subsystem: String, factor: f64 },
    /// Page the emergency contact for human review.
    EscalateToHuman,
    /// Full emergency shutdown.
    EmergencyShutdown,
    LogOnly,
}

impl std::fmt::Display for PlaybookAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmergencyIsolate { subsystems } => {
                write!(f, "emergency isolate {}", subsystems.join(", "))
            }
            Self::EngageBrake {
                subsystem,
                duration_secs,
            } => write!(f, "brake {subsystem} for {duration_secs}s"),
            Self::TightenLimits { subsystem, factor } => {
                write!(f, "tighten {subsystem} limits by {factor}")
            }
            Self::EscalateToHuman => f.write_str("escalate to human reviewer"),
            Self::EmergencyShutdown => f.write_str("emergency shutdown"),
            Self::LogOnly => f.write_str("log"),
        }
    }
}

/// Response steps for a newly accepted incident.
pub fn plan(incident: &Incident, settings: &CoordinatorSettings) -> Vec<PlaybookAction> {
    let subsystem_specific = incident.subsystem != SYSTEM_WIDE;
    match incident.incident_type {
        IncidentType::IsolationBreach if incident.severity >= Severity::High => {
            if subsystem_specific {
                vec![PlaybookAction::EmergencyIsolate {
                    subsystems: vec![incident.subsystem.clone()],
                }]
            } else {
                vec![PlaybookAction::EscalateToHuman]
            }
        }
        IncidentType::BehavioralDrift if incident.severity >= Severity::High => {
            let mut actions: Vec<PlaybookAction> = settings
                .drift_brake_subsystems
                .iter()
                .map(|s| PlaybookAction::EngageBrake {
                    subsystem: s.clone(),
                    duration_secs: settings.drift_brake_secs,
                })
                .collect();
            actions.push(PlaybookAction::EscalateToHuman);
            actions
        }
        IncidentType::RateLimitViolation | IncidentType::UnauthorizedAccess
            if subsystem_specific =>
        {
            let mut actions = vec![PlaybookAction::TightenLimits {
                subsystem: incident.subsystem.clone(),
                factor: settings.tighten_factor,
            }];
            if incident.severity == Severity::Critical {
                actions.push(PlaybookAction::EscalateToHuman);
            }
            actions
        }
        IncidentType::HumanOversightFailure
        | IncidentType::SystemInstability
        | IncidentType::UnauthorizedAccess
            if incident.severity >= Severity::High =>
        {
            vec![PlaybookAction::EscalateToHuman]
        }
        IncidentType::CascadeFailure => vec![PlaybookAction::EmergencyShutdown],
        _ => vec![PlaybookAction::LogOnly],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentSignal;
    use chrono::Utc;

    fn incident(kind: IncidentType, severity: Severity, subsystem: &str) -> Incident {
        Incident::open(
            "inc".into(),
            IncidentSignal::new(kind, severity, subsystem, "test"),
            Utc::now(),
        )
    }

    #[test]
    fn high_breach_isolates_subsystem() {
        let actions = plan(
            &incident(IncidentType::IsolationBreach, Severity::High, "memory"),
            &CoordinatorSettings::default(),
        );
        assert_eq!(
            actions,
            vec![PlaybookAction::EmergencyIsolate {
                subsystems: vec!["memory".into()]
            }]
        );
    }

    #[test]
    fn drift_brakes_personality_and_codegen_for_an_hour() {
        let actions = plan(
            &incident(IncidentType::BehavioralDrift, Severity::Critical, SYSTEM_WIDE),
            &CoordinatorSettings::default(),
        );
        assert_eq!(actions.len(), 3);
        assert!(actions.contains(&PlaybookAction::EngageBrake {
            subsystem: "personality_evolution".into(),
            duration_secs: 3600,
        }));
        assert!(actions.contains(&PlaybookAction::EngageBrake {
            subsystem: "code_generation".into(),
            duration_secs: 3600,
        }));
        assert_eq!(actions.last(), Some(&PlaybookAction::EscalateToHuman));
    }

    #[test]
    fn medium_drift_only_logs() {
        let actions = plan(
            &incident(IncidentType::BehavioralDrift, Severity::Medium, SYSTEM_WIDE),
            &CoordinatorSettings::default(),
        );
        assert_eq!(actions, vec![PlaybookAction::LogOnly]);
    }

    #[test]
    fn rate_violation_tightens() {
        let actions = plan(
            &incident(IncidentType::RateLimitViolation, Severity::Medium, "sass_adjustment"),
            &CoordinatorSettings::default(),
        );
        assert_eq!(
            actions,
            vec![PlaybookAction::TightenLimits {
                subsystem: "sass_adjustment".into(),
                factor: 0.5
            }]
        );
    }

    #[test]
    fn system_wide_unauthorized_access_escalates() {
        let actions = plan(
            &incident(IncidentType::UnauthorizedAccess, Severity::Critical, SYSTEM_WIDE),
            &CoordinatorSettings::default(),
        );
        assert_eq!(actions, vec![PlaybookAction::EscalateToHuman]);
    }

    #[test]
    fn cascade_shuts_down() {
        let actions = plan(
            &incident(IncidentType::CascadeFailure, Severity::Critical, SYSTEM_WIDE),
            &CoordinatorSettings::default(),
        );
        assert_eq!(actions, vec![PlaybookAction::EmergencyShutdown]);
    }
}
