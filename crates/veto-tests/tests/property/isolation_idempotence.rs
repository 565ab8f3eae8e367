//! Property tests: validate_interaction is a pure read for identical inputs.

use proptest::prelude::*;
use serde_json::Value;
use veto_tests::{epoch, registry};

fn arb_subsystem() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("personality_evolution"),
        Just("sass_adjustment"),
        Just("code_generation"),
        Just("research"),
        Just("memory"),
        Just("conversation"),
        Just("telepathy"),
    ]
}

fn arb_operation() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("read"),
        Just("write"),
        Just("evolve"),
        Just("generate"),
        Just("execute_code"),
        Just("network_access"),
        Just("delete"),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn identical_calls_yield_identical_decisions(
        requestor in arb_subsystem(),
        target in arb_subsystem(),
        operation in arb_operation(),
    ) {
        let registry = registry();
        let first = registry
            .validate_interaction_at(requestor, target, operation, &Value::Null, epoch())
            .unwrap();
        let second = registry
            .validate_interaction_at(requestor, target, operation, &Value::Null, epoch())
            .unwrap();
        prop_assert_eq!(first, second);
    }
}
