//! Property tests: a repeated (incident type, subsystem) pair inside the
//! dedup window opens exactly one incident.

use chrono::Duration;
use proptest::prelude::*;
use veto_coordinator::{IncidentSignal, IncidentType};
use veto_tests::{epoch, Fixture};
use veto_types::Severity;

fn arb_incident_type() -> impl Strategy<Value = IncidentType> {
    prop_oneof![
        Just(IncidentType::IsolationBreach),
        Just(IncidentType::RateLimitViolation),
        Just(IncidentType::BehavioralDrift),
        Just(IncidentType::HumanOversightFailure),
        Just(IncidentType::SystemInstability),
        Just(IncidentType::UnauthorizedAccess),
    ]
}

fn arb_severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High),
        Just(Severity::Critical),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn repeats_within_an_hour_collapse(
        incident_type in arb_incident_type(),
        severity in arb_severity(),
        subsystem in prop_oneof![Just("memory"), Just("research"), Just("conversation")],
        mut offsets in prop::collection::vec(0i64..3600, 2..8),
    ) {
        offsets.sort_unstable();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let open = rt.block_on(async {
            let fx = Fixture::new();
            let first = offsets[0];
            for offset in &offsets {
                fx.coordinator
                    .report_incident_at(
                        IncidentSignal::new(incident_type, severity, subsystem, "repeated signal"),
                        epoch() + Duration::seconds(offset - first),
                    )
                    .await
                    .unwrap();
            }
            fx.coordinator.open_incidents().unwrap()
        });
        let matching = open
            .iter()
            .filter(|i| i.incident_type == incident_type && i.subsystem == subsystem)
            .count();
        prop_assert_eq!(matching, 1);
    }
}
