//! Schema validation with default application and legacy fallback
//!
//! `validate` never errors for ordinarily invalid input: the outcome carries
//! the rendered errors instead. Errors are reserved for unknown schema keys
//! and migration contract violations.

use serde_json::Value;

use doccheck_common::Result;

use crate::migrate::{compatible_sources, migrate};
use crate::registry::{registry, SchemaEntry};

/// Result of validating one object against one schema key.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,

    /// Rendered validation errors, `<path> <message> (<schema>)` joined by `, `
    pub errors: Option<String>,

    /// The object, with type coercion and schema defaults applied
    pub object: Value,
}

/// Validate an object against a schema key.
///
/// On failure, any compatible older schema that validates the object is
/// migrated to the target and revalidated; if none matches, the original
/// errors are returned.
pub fn validate(schema_key: &str, object: &Value, add_defaults: bool) -> Result<ValidationOutcome> {
    let entry = registry().get(schema_key)?;
    let outcome = validate_entry(entry, object, add_defaults);
    if outcome.valid {
        return Ok(outcome);
    }

    for source_key in compatible_sources(schema_key) {
        let source_entry = registry().get(source_key)?;
        let probe = validate_entry(source_entry, object, true);
        if probe.valid {
            tracing::debug!(
                source = source_key,
                target = schema_key,
                "object matches a compatible legacy schema, migrating"
            );
            let migrated = migrate(source_key, schema_key, &probe.object)?;
            return Ok(validate_entry(entry, &migrated, add_defaults));
        }
    }

    Ok(outcome)
}

/// Validate against a single schema key with no legacy fallback.
pub(crate) fn validate_no_fallback(
    schema_key: &str,
    object: &Value,
    add_defaults: bool,
) -> Result<ValidationOutcome> {
    let entry = registry().get(schema_key)?;
    Ok(validate_entry(entry, object, add_defaults))
}

fn validate_entry(entry: &SchemaEntry, object: &Value, add_defaults: bool) -> ValidationOutcome {
    let mut object = object.clone();
    if add_defaults {
        apply_defaults(entry.document(), &mut object);
    }

    if entry.validator().is_valid(&object) {
        ValidationOutcome { valid: true, errors: None, object }
    } else {
        let errors = render_errors(entry, &object);
        ValidationOutcome { valid: false, errors: Some(errors), object }
    }
}

/// Render validation errors as `<path> <message> (<schema>)`, joined by `, `.
fn render_errors(entry: &SchemaEntry, object: &Value) -> String {
    let rendered: Vec<String> = entry
        .validator()
        .iter_errors(object)
        .map(|err| {
            let path = err.instance_path().to_string();
            let path = if path.is_empty() { "/".to_string() } else { path };
            format!("{} {} ({})", path, err, entry.key())
        })
        .collect();
    rendered.join(", ")
}

/// Apply type coercion and schema defaults to an object, walking nested
/// `properties` and the object branch of `oneOf` alternations.
pub(crate) fn apply_defaults(schema: &Value, value: &mut Value) {
    coerce(schema, value);

    if let Some(branches) = schema.get("oneOf").and_then(Value::as_array) {
        if value.is_object() {
            if let Some(branch) = branches
                .iter()
                .find(|b| b.get("type").and_then(Value::as_str) == Some("object"))
            {
                apply_defaults(branch, value);
            }
        }
    }

    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    for (key, prop_schema) in props {
        match obj.get_mut(key) {
            Some(existing) => apply_defaults(prop_schema, existing),
            None => {
                if let Some(default) = prop_schema.get("default") {
                    obj.insert(key.clone(), default.clone());
                }
            }
        }
    }
}

/// Best-effort scalar coercion toward the declared type.
fn coerce(schema: &Value, value: &mut Value) {
    let Some(declared) = schema.get("type").and_then(Value::as_str) else {
        return;
    };
    match declared {
        "integer" => {
            if let Some(s) = value.as_str() {
                if let Ok(parsed) = s.trim().parse::<i64>() {
                    *value = Value::from(parsed);
                }
            }
        }
        "number" => {
            if let Some(s) = value.as_str() {
                if let Ok(parsed) = s.trim().parse::<f64>() {
                    *value = Value::from(parsed);
                }
            }
        }
        "boolean" => {
            if let Some(s) = value.as_str() {
                match s.trim() {
                    "true" => *value = Value::Bool(true),
                    "false" => *value = Value::Bool(false),
                    _ => {}
                }
            }
        }
        "array" => {
            if !value.is_array() && !value.is_null() {
                *value = Value::Array(vec![value.take()]);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doccheck_common::Error;
    use serde_json::json;

    #[test]
    fn valid_step_gets_defaults() {
        let outcome = validate("step_v3", &json!({ "goTo": "https://example.com" }), true).unwrap();
        assert!(outcome.valid, "errors: {:?}", outcome.errors);
        assert_eq!(outcome.object["unsafe"], json!(false));
        assert_eq!(outcome.object["retries"], json!(0));
    }

    #[test]
    fn nested_defaults_apply_through_one_of() {
        let outcome = validate(
            "step_v3",
            &json!({ "runShell": { "command": "echo hi" } }),
            true,
        )
        .unwrap();
        assert!(outcome.valid, "errors: {:?}", outcome.errors);
        assert_eq!(outcome.object["runShell"]["exitCodes"], json!([0]));
        assert_eq!(outcome.object["runShell"]["overwrite"], json!("false"));
    }

    #[test]
    fn defaults_can_be_disabled() {
        let outcome =
            validate("step_v3", &json!({ "goTo": "https://example.com" }), false).unwrap();
        assert!(outcome.valid);
        assert!(outcome.object.get("unsafe").is_none());
    }

    #[test]
    fn invalid_object_reports_rendered_errors() {
        let outcome = validate("step_v3", &json!({ "bogus": true }), true).unwrap();
        assert!(!outcome.valid);
        let errors = outcome.errors.unwrap();
        assert!(errors.contains("step_v3"), "errors: {errors}");
    }

    #[test]
    fn step_with_two_actions_is_invalid() {
        let outcome = validate(
            "step_v3",
            &json!({ "goTo": "https://example.com", "wait": 500 }),
            true,
        )
        .unwrap();
        assert!(!outcome.valid);
    }

    #[test]
    fn legacy_object_migrates_through_fallback() {
        let outcome = validate(
            "step_v3",
            &json!({ "action": "goTo", "uri": "https://example.com" }),
            true,
        )
        .unwrap();
        assert!(outcome.valid, "errors: {:?}", outcome.errors);
        assert_eq!(outcome.object["goTo"]["url"], json!("https://example.com"));
    }

    #[test]
    fn unknown_schema_key_errors() {
        let err = validate("widget_v1", &json!({}), true).unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound(_)));
    }

    #[test]
    fn string_coercion_to_integer() {
        let outcome = validate("step_v3", &json!({ "wait": 500, "timeout": "9000" }), true).unwrap();
        assert!(outcome.valid, "errors: {:?}", outcome.errors);
        assert_eq!(outcome.object["timeout"], json!(9000));
    }
}
