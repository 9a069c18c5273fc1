//! Schema migration
//!
//! Transforms an object conforming to an older schema into the canonical
//! current schema, then revalidates. Every mapping is crafted to always
//! satisfy the target schema; a migration that yields an invalid object is
//! a design-contract violation and raises loudly.

use serde_json::{json, Map, Value};
use tracing::error;

use doccheck_common::{Error, Result};

use crate::validator::validate_no_fallback;

/// Static many-to-one compatibility map: (older schema, target schema).
pub const COMPATIBILITY: &[(&str, &str)] = &[
    ("goTo_v2", "step_v3"),
    ("find_v2", "step_v3"),
    ("httpRequest_v2", "step_v3"),
    ("runShell_v2", "step_v3"),
    ("saveScreenshot_v2", "step_v3"),
    ("test_v2", "test_v3"),
];

/// Older schema keys that migrate to the given target.
pub fn compatible_sources(target: &str) -> Vec<&'static str> {
    COMPATIBILITY
        .iter()
        .filter(|(_, to)| *to == target)
        .map(|(from, _)| *from)
        .collect()
}

fn is_compatible(from: &str, to: &str) -> bool {
    COMPATIBILITY.iter().any(|(f, t)| *f == from && *t == to)
}

/// Migrate an object between schema versions.
///
/// Identity when the keys are equal; `UnsupportedTransform` when the pair
/// is not in the compatibility map.
pub fn migrate(current: &str, target: &str, object: &Value) -> Result<Value> {
    if current == target {
        return Ok(object.clone());
    }
    if !is_compatible(current, target) {
        return Err(Error::UnsupportedTransform {
            from: current.to_string(),
            to: target.to_string(),
        });
    }

    let migrated = match current {
        "goTo_v2" => migrate_go_to(object),
        "find_v2" => migrate_find(object),
        "httpRequest_v2" => migrate_http_request(object),
        "runShell_v2" => migrate_run_shell(object),
        "saveScreenshot_v2" => migrate_save_screenshot(object),
        "test_v2" => migrate_test(object)?,
        other => {
            return Err(Error::UnsupportedTransform {
                from: other.to_string(),
                to: target.to_string(),
            })
        }
    };

    let outcome = validate_no_fallback(target, &migrated, true)?;
    if !outcome.valid {
        let errors = outcome.errors.unwrap_or_default();
        error!(
            source = current,
            target = target,
            errors = %errors,
            "migration produced an object that fails target validation"
        );
        return Err(Error::ContractViolation(format!(
            "migrating {current} to {target} produced an invalid object: {errors}"
        )));
    }
    Ok(outcome.object)
}

fn copy_description(source: &Value, step: &mut Map<String, Value>) {
    if let Some(description) = source.get("description") {
        step.insert("description".to_string(), description.clone());
    }
}

fn migrate_go_to(source: &Value) -> Value {
    let mut step = Map::new();
    copy_description(source, &mut step);
    step.insert(
        "goTo".to_string(),
        json!({ "url": source.get("uri").cloned().unwrap_or_default() }),
    );
    Value::Object(step)
}

fn migrate_find(source: &Value) -> Value {
    let mut find = Map::new();
    find.insert(
        "selector".to_string(),
        source.get("css").cloned().unwrap_or_default(),
    );
    if let Some(text) = source.get("matchText") {
        find.insert("elementText".to_string(), text.clone());
    }
    if let Some(move_to) = source.get("moveTo") {
        find.insert("moveTo".to_string(), move_to.clone());
    }
    if let Some(click) = source.get("click") {
        find.insert("click".to_string(), click.clone());
    }
    if let Some(keys) = source.get("typeKeys") {
        find.insert("typeKeys".to_string(), keys.clone());
    }

    let mut step = Map::new();
    copy_description(source, &mut step);
    step.insert("find".to_string(), Value::Object(find));
    Value::Object(step)
}

/// Flat v2 request fields restructure into nested `request`/`response`
/// groups; `setVariables` entries become expression strings.
fn migrate_http_request(source: &Value) -> Value {
    let mut request = Map::new();
    request.insert(
        "url".to_string(),
        source.get("uri").cloned().unwrap_or_default(),
    );
    if let Some(method) = source.get("method") {
        request.insert("method".to_string(), method.clone());
    }
    if let Some(headers) = source.get("requestHeaders") {
        request.insert("headers".to_string(), headers.clone());
    }
    if let Some(body) = source.get("requestData") {
        request.insert("body".to_string(), body.clone());
    }

    let mut response = Map::new();
    if let Some(codes) = source.get("statusCodes") {
        response.insert("statusCodes".to_string(), codes.clone());
    }
    if let Some(headers) = source.get("responseHeaders") {
        response.insert("headers".to_string(), headers.clone());
    }
    if let Some(body) = source.get("responseData") {
        response.insert("body".to_string(), body.clone());
    }

    let mut http = Map::new();
    http.insert("request".to_string(), Value::Object(request));
    if !response.is_empty() {
        http.insert("response".to_string(), Value::Object(response));
    }

    let mut step = Map::new();
    copy_description(source, &mut step);
    step.insert("httpRequest".to_string(), Value::Object(http));
    insert_variables(source, &mut step);
    Value::Object(step)
}

fn migrate_run_shell(source: &Value) -> Value {
    let mut step = Map::new();
    copy_description(source, &mut step);
    step.insert(
        "runShell".to_string(),
        json!({ "command": source.get("command").cloned().unwrap_or_default() }),
    );
    insert_variables(source, &mut step);
    Value::Object(step)
}

/// Percentage `maxVariation` converts to a fraction; the legacy
/// `byVariation` overwrite mode becomes `aboveVariation`. Both conversions
/// are one-way.
fn migrate_save_screenshot(source: &Value) -> Value {
    let mut screenshot = Map::new();
    if let Some(path) = source.get("path") {
        screenshot.insert("path".to_string(), path.clone());
    }
    let percent = source.get("maxVariation").and_then(Value::as_f64).unwrap_or(5.0);
    screenshot.insert("maxVariation".to_string(), json!(percent / 100.0));
    let overwrite = match source.get("overwrite").and_then(Value::as_str) {
        Some("byVariation") => "aboveVariation",
        Some(other) => other,
        None => "false",
    };
    screenshot.insert("overwrite".to_string(), json!(overwrite));

    let mut step = Map::new();
    copy_description(source, &mut step);
    step.insert("screenshot".to_string(), Value::Object(screenshot));
    Value::Object(step)
}

/// `setVariables` list entries become `variables` map entries expressed as
/// expression strings over the step's captured outputs.
fn insert_variables(source: &Value, step: &mut Map<String, Value>) {
    let Some(entries) = source.get("setVariables").and_then(Value::as_array) else {
        return;
    };
    let mut variables = Map::new();
    for entry in entries {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        let expression = if let Some(filter) = entry.get("jqFilter").and_then(Value::as_str) {
            format!("{{{{jq($$response, '{filter}')}}}}")
        } else if let Some(pattern) = entry.get("regex").and_then(Value::as_str) {
            format!("{{{{extract($$stdout, '{pattern}')}}}}")
        } else {
            continue;
        };
        variables.insert(name.to_string(), Value::String(expression));
    }
    if !variables.is_empty() {
        step.insert("variables".to_string(), Value::Object(variables));
    }
}

fn migrate_test(source: &Value) -> Result<Value> {
    let mut test = Map::new();
    if let Some(id) = source.get("id") {
        test.insert("testId".to_string(), id.clone());
    }
    copy_description(source, &mut test);
    if let Some(setup) = source.get("setup") {
        test.insert("before".to_string(), setup.clone());
    }
    if let Some(cleanup) = source.get("cleanup") {
        test.insert("after".to_string(), cleanup.clone());
    }

    let mut steps = Vec::new();
    if let Some(actions) = source.get("actions").and_then(Value::as_array) {
        for action in actions {
            let step = match action.get("action").and_then(Value::as_str) {
                Some(name) if is_compatible(&format!("{name}_v2"), "step_v3") => {
                    migrate(&format!("{name}_v2"), "step_v3", action)?
                }
                _ => action.clone(),
            };
            steps.push(step);
        }
    }
    test.insert("steps".to_string(), Value::Array(steps));
    Ok(Value::Object(test))
}
