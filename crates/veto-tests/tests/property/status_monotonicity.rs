//! Property tests: three or more open HIGH/CRITICAL incidents never leave
//! the system OPERATIONAL, and status never drops while incidents accumulate.

use proptest::prelude::*;
use veto_coordinator::{IncidentSignal, IncidentType, SafetyStatus};
use veto_tests::Fixture;
use veto_types::Severity;

const SUBSYSTEMS: [&str; 6] = [
    "personality_evolution",
    "sass_adjustment",
    "code_generation",
    "research",
    "memory",
    "conversation",
];

fn arb_serious() -> impl Strategy<Value = (IncidentType, Severity)> {
    (
        prop_oneof![
            Just(IncidentType::IsolationBreach),
            Just(IncidentType::RateLimitViolation),
            Just(IncidentType::BehavioralDrift),
            Just(IncidentType::HumanOversightFailure),
            Just(IncidentType::SystemInstability),
            Just(IncidentType::UnauthorizedAccess),
            Just(IncidentType::CascadeFailure),
        ],
        prop_oneof![Just(Severity::High), Just(Severity::Critical)],
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn serious_incidents_raise_status(
        incidents in prop::collection::vec(arb_serious(), 3..=6),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let statuses = rt.block_on(async {
            let fx = Fixture::new();
            let mut statuses = Vec::new();
            for (i, (incident_type, severity)) in incidents.iter().enumerate() {
                fx.coordinator
                    .report_incident(IncidentSignal::new(
                        *incident_type,
                        *severity,
                        SUBSYSTEMS[i],
                        "generated incident",
                    ))
                    .await
                    .unwrap();
                statuses.push(fx.coordinator.status().unwrap());
            }
            statuses
        });

        for pair in statuses.windows(2) {
            prop_assert!(pair[0] <= pair[1], "status dropped: {:?}", statuses);
        }
        let last = *statuses.last().unwrap();
        prop_assert!(matches!(
            last,
            SafetyStatus::ElevatedRisk | SafetyStatus::Critical | SafetyStatus::EmergencyShutdown
        ));
    }
}
