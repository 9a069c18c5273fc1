//! Expression evaluation for variable injection and assertions
//!
//! Expressions appear in step fields and variable captures: `$$name` and
//! `$$name#/json/pointer` references, `{{...}}` embedded expressions, and
//! the operators `extract(haystack, pattern)` and `jq(json, filter)`.
//! Unresolved references leave the original text intact; operator errors
//! yield no value and never propagate.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\$([A-Za-z_][A-Za-z0-9_.]*)(#(/[^\s\x22'{}),]*))?").unwrap()
});

static EMBED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").unwrap());

static WHOLE_EMBED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\{\{(.*)\}\}$").unwrap());

static OPERATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^(extract|jq)\s*\((.*)\)$").unwrap());

static OPERATOR_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(extract|jq)\s*\(").unwrap());

/// Resolve an expression against a runtime context.
///
/// Non-string input passes through unchanged. A string that is exactly one
/// reference or one embedded expression returns the resolved value itself;
/// anything else is treated as string interpolation.
pub fn resolve(expression: &Value, context: &Value) -> Value {
    match expression {
        Value::String(s) => resolve_str(s, context),
        other => other.clone(),
    }
}

/// Resolve a string expression against a runtime context.
pub fn resolve_str(expression: &str, context: &Value) -> Value {
    let trimmed = expression.trim();

    // A lone embedded expression yields its value, not a stringified form.
    if let Some(caps) = WHOLE_EMBED_RE.captures(trimmed) {
        if let Some(value) = evaluate_inner(&caps[1], context) {
            return value;
        }
        return Value::String(expression.to_string());
    }

    // A lone reference likewise.
    if let Some(caps) = REF_RE.captures(trimmed) {
        if caps.get(0).map(|m| m.as_str()) == Some(trimmed) {
            return match lookup(context, &caps[1], caps.get(3).map(|m| m.as_str())) {
                Some(value) => value,
                None => Value::String(expression.to_string()),
            };
        }
    }

    // Interpolation: embedded expressions first, then bare references.
    let embedded = EMBED_RE.replace_all(expression, |caps: &regex::Captures<'_>| {
        match evaluate_inner(&caps[1], context) {
            Some(value) => value_to_string(&value),
            None => caps[0].to_string(),
        }
    });
    let substituted = substitute_refs(&embedded, context);
    Value::String(substituted)
}

/// Resolve an expression and coerce it to a boolean.
///
/// Literal `"true"`/`"false"` map directly. A resolved string that still
/// contains unresolved `$$` references is false: a capture that could not
/// be evaluated must not pass an assertion. Any other non-empty resolved
/// string is truthy.
pub fn evaluate_assertion(expression: &str, context: &Value) -> bool {
    match resolve_str(expression, context) {
        Value::Bool(b) => b,
        Value::Null => false,
        Value::Number(_) => true,
        Value::Array(_) | Value::Object(_) => true,
        Value::String(s) => {
            let trimmed = s.trim();
            match trimmed {
                "true" => true,
                "false" | "" => false,
                _ => !trimmed.contains("$$"),
            }
        }
    }
}

/// Evaluate the inside of a `{{...}}` expression. `None` means the
/// expression could not be evaluated and the original text is preserved.
fn evaluate_inner(inner: &str, context: &Value) -> Option<Value> {
    let trimmed = inner.trim();

    if let Some(caps) = OPERATOR_RE.captures(trimmed) {
        let args = split_args(&caps[2]);
        return match &caps[1] {
            "extract" => apply_extract(&args, context),
            "jq" => apply_jq(&args, context),
            _ => None,
        };
    }

    // Operator-looking text that failed to parse is an evaluation error.
    if OPERATOR_PREFIX_RE.is_match(trimmed) {
        return None;
    }

    // A lone reference yields its value; otherwise substitute into a string.
    if let Some(caps) = REF_RE.captures(trimmed) {
        if caps.get(0).map(|m| m.as_str()) == Some(trimmed) {
            return lookup(context, &caps[1], caps.get(3).map(|m| m.as_str()));
        }
        let substituted = substitute_refs(trimmed, context);
        if substituted.contains("$$") {
            return None;
        }
        return Some(Value::String(substituted));
    }

    Some(Value::String(trimmed.to_string()))
}

/// `extract(haystack, pattern)`: first regex capture group of the pattern
/// applied to the haystack.
fn apply_extract(args: &[String], context: &Value) -> Option<Value> {
    if args.len() != 2 {
        return None;
    }
    let haystack = arg_as_string(&args[0], context)?;
    let pattern = arg_as_string(&args[1], context)?;
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(&haystack)?;
    let group = caps.get(1).or_else(|| caps.get(0))?;
    Some(Value::String(group.as_str().to_string()))
}

/// `jq(json, filter)`: JSONPath query over a JSON value. A single result
/// is returned as-is; multiple results become an array.
fn apply_jq(args: &[String], context: &Value) -> Option<Value> {
    if args.len() != 2 {
        return None;
    }
    let json = arg_as_value(&args[0], context)?;
    let filter = arg_as_string(&args[1], context)?;
    let selected = jsonpath_lib::select(&json, &filter).ok()?;
    match selected.len() {
        0 => None,
        1 => Some(selected[0].clone()),
        _ => Some(Value::Array(selected.into_iter().cloned().collect())),
    }
}

/// Resolve an operator argument to a string.
fn arg_as_string(arg: &str, context: &Value) -> Option<String> {
    let value = arg_as_value(arg, context)?;
    Some(value_to_string(&value))
}

/// Resolve an operator argument to a value: quoted literal, lone reference,
/// JSON literal, or substituted string, in that order.
fn arg_as_value(arg: &str, context: &Value) -> Option<Value> {
    let trimmed = arg.trim();

    if let Some(inner) = unquote(trimmed) {
        return Some(Value::String(inner));
    }

    if let Some(caps) = REF_RE.captures(trimmed) {
        if caps.get(0).map(|m| m.as_str()) == Some(trimmed) {
            return lookup(context, &caps[1], caps.get(3).map(|m| m.as_str()));
        }
    }

    let substituted = substitute_refs(trimmed, context);
    if substituted.contains("$$") {
        return None;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(&substituted) {
        return Some(parsed);
    }
    Some(Value::String(substituted))
}

/// Substitute every `$$name` reference in a string, leaving unresolved
/// references intact.
fn substitute_refs(input: &str, context: &Value) -> String {
    REF_RE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            match lookup(context, &caps[1], caps.get(3).map(|m| m.as_str())) {
                Some(value) => value_to_string(&value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Walk the context by dot-notation, then by optional JSON pointer.
fn lookup(context: &Value, name: &str, pointer: Option<&str>) -> Option<Value> {
    let mut current = context;
    for segment in name.split('.') {
        current = current.get(segment)?;
    }
    let value = match pointer {
        Some(ptr) => current.pointer(ptr)?,
        None => current,
    };
    Some(value.clone())
}

/// String form of a resolved value: strings verbatim, everything else as JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Split operator arguments at top-level commas, respecting quotes and
/// nested brackets.
fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in input.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    current.push(ch);
                }
                ')' | ']' | '}' => {
                    depth = depth.saturating_sub(1);
                    current.push(ch);
                }
                ',' if depth == 0 => {
                    args.push(current.trim().to_string());
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

/// Strip matching single or double quotes from a literal argument.
fn unquote(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if first == last && (first == b'"' || first == b'\'') {
            return Some(input[1..input.len() - 1].to_string());
        }
    }
    None
}
