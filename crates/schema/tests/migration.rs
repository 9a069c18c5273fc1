//! Migration round-trip tests across the whole compatibility map.

use doccheck_schema::{migrate, registry, validate};
use doccheck_schema::migrate::COMPATIBILITY;
use serde_json::Value;

/// Every embedded example of every legacy schema migrates to its target and
/// validates there, and re-migration to the same target is the identity.
#[test]
fn every_compatible_pair_round_trips() {
    for (source, target) in COMPATIBILITY {
        let document = registry().get(source).unwrap().document().clone();
        let examples = document
            .get("examples")
            .and_then(Value::as_array)
            .unwrap_or_else(|| panic!("schema {source} has no examples"));

        for example in examples {
            let migrated = migrate(source, target, example)
                .unwrap_or_else(|e| panic!("{source} -> {target} failed: {e}"));

            let outcome = validate(target, &migrated, true).unwrap();
            assert!(
                outcome.valid,
                "{source} example migrated to {target} but fails validation: {:?}",
                outcome.errors
            );

            let again = migrate(target, target, &migrated).unwrap();
            assert_eq!(again, migrated, "re-migration of {source} -> {target} not idempotent");
        }
    }
}

/// The validator's fallback path accepts legacy objects wherever the
/// compatibility map allows it.
#[test]
fn validator_fallback_accepts_every_legacy_example() {
    for (source, target) in COMPATIBILITY {
        let document = registry().get(source).unwrap().document().clone();
        let examples = document.get("examples").and_then(Value::as_array).unwrap();

        for example in examples {
            let outcome = validate(target, example, true).unwrap();
            assert!(
                outcome.valid,
                "legacy {source} example rejected by {target} fallback: {:?}",
                outcome.errors
            );
        }
    }
}

/// Migration to an unrelated schema is a typed error, not a panic.
#[test]
fn unsupported_transform_is_typed() {
    let err = migrate("goTo_v2", "spec_v3", &serde_json::json!({})).unwrap_err();
    assert!(matches!(err, doccheck_common::Error::UnsupportedTransform { .. }));
}
