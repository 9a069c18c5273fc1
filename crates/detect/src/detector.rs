//! Test detection: fold document matches into test definitions
//!
//! All statement and markup matches are collected with their positions,
//! sorted, and folded left-to-right with two pieces of state: the current
//! test (created on demand with a generated id) and an ignore flag.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use doccheck_common::config::{Config, FileTypeConfig, MarkupAction};
use doccheck_common::{generate_id, Result, Test};
use doccheck_schema::validate;

use crate::markup::{compile_file_type, CompiledFileType, StatementKind};

static ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*"([^"]*)""#).unwrap());

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([0-9])").unwrap());

/// Input to a detection pass over one document.
pub struct DetectInput<'a> {
    pub content: &'a str,
    pub file_path: &'a Path,
    pub file_type: &'a FileTypeConfig,
    pub config: &'a Config,
}

enum MatchKind {
    Statement(StatementKind, Option<String>),
    Markup { rule: usize, captures: Vec<String> },
}

struct DetectedMatch {
    pos: usize,
    order: usize,
    kind: MatchKind,
}

/// Scan a document and emit validated tests.
///
/// Steps that fail validation are logged and dropped; tests that fail final
/// validation are dropped with a warning. Neither is fatal to the run.
pub fn detect_tests(input: &DetectInput<'_>) -> Result<Vec<Test>> {
    let compiled = compile_file_type(input.file_type, input.config.detect_steps);
    let matches = collect_matches(input.content, &compiled);

    let mut fold = Fold::default();
    for matched in &matches {
        match &matched.kind {
            MatchKind::Statement(kind, payload) => {
                fold.statement(*kind, payload.as_deref(), input)
            }
            MatchKind::Markup { rule, captures } => {
                fold.markup(&compiled, *rule, captures, input)
            }
        }
    }
    fold.close_current();

    let mut tests = Vec::new();
    for value in fold.finished {
        let outcome = validate("test_v3", &value, true)?;
        if !outcome.valid {
            warn!(
                file = %input.file_path.display(),
                errors = outcome.errors.as_deref().unwrap_or(""),
                "dropping detected test that fails validation"
            );
            continue;
        }
        match serde_json::from_value::<Test>(outcome.object) {
            Ok(test) => tests.push(test),
            Err(e) => warn!(
                file = %input.file_path.display(),
                "dropping detected test that fails to parse: {e}"
            ),
        }
    }
    Ok(tests)
}

/// Collect all statement and markup matches with their positions, sorted
/// left-to-right. Statements collected before markup win position ties.
fn collect_matches(content: &str, compiled: &CompiledFileType) -> Vec<DetectedMatch> {
    let mut matches = Vec::new();
    let mut order = 0usize;

    for (kind, re) in &compiled.statements {
        for caps in re.captures_iter(content) {
            let whole = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let payload = caps.get(1).map(|m| m.as_str().to_string());
            matches.push(DetectedMatch {
                pos: whole,
                order,
                kind: MatchKind::Statement(*kind, payload),
            });
            order += 1;
        }
    }

    for (rule_index, rule) in compiled.markup.iter().enumerate() {
        for re in &rule.patterns {
            for caps in re.captures_iter(content) {
                let pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
                let captures: Vec<String> = (0..caps.len())
                    .map(|i| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                matches.push(DetectedMatch {
                    pos,
                    order,
                    kind: MatchKind::Markup { rule: rule_index, captures },
                });
                order += 1;
            }
        }
    }

    matches.sort_by_key(|m| (m.pos, m.order));
    matches
}

/// A test under construction.
struct TestBuilder {
    value: Map<String, Value>,
    steps: Vec<Value>,
    detect_steps: bool,
    /// Slot in `steps` holding the combined step of each batching rule
    batch_slots: HashMap<usize, usize>,
}

#[derive(Default)]
struct Fold {
    current: Option<TestBuilder>,
    ignore: bool,
    finished: Vec<Value>,
}

impl Fold {
    fn statement(&mut self, kind: StatementKind, payload: Option<&str>, input: &DetectInput<'_>) {
        match kind {
            StatementKind::IgnoreEnd => {
                // Processed even while ignoring; everything else inside an
                // ignore block is discarded.
                self.ignore = false;
                return;
            }
            _ if self.ignore => return,
            StatementKind::IgnoreStart => self.ignore = true,
            StatementKind::TestStart => {
                self.close_current();
                let declared = normalize_test_payload(parse_payload(payload.unwrap_or("")));
                self.current = Some(TestBuilder::new(declared));
            }
            StatementKind::TestEnd => {
                self.close_current();
                self.ignore = false;
            }
            StatementKind::Step => {
                let parsed = parse_payload(payload.unwrap_or(""));
                self.push_step(parsed, input);
            }
        }
    }

    fn markup(
        &mut self,
        compiled: &CompiledFileType,
        rule_index: usize,
        captures: &[String],
        input: &DetectInput<'_>,
    ) {
        if self.ignore || !input.config.detect_steps {
            return;
        }
        if let Some(current) = &self.current {
            if !current.detect_steps {
                return;
            }
        }

        let rule = &compiled.markup[rule_index];
        let content = captures.get(1).or_else(|| captures.first()).cloned().unwrap_or_default();

        for action in rule.actions.clone() {
            let candidate = match action {
                MarkupAction::Name(name) => {
                    let mut step = Map::new();
                    step.insert(name, Value::String(content.trim().to_string()));
                    Value::Object(step)
                }
                MarkupAction::Template(template) => substitute_placeholders(&template, captures),
            };
            let validated = match validate("step_v3", &candidate, true) {
                Ok(outcome) if outcome.valid => outcome.object,
                Ok(outcome) => {
                    warn!(
                        file = %input.file_path.display(),
                        rule = %rule.name,
                        errors = outcome.errors.as_deref().unwrap_or(""),
                        "dropping markup step that fails validation"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(rule = %rule.name, "markup step validation errored: {e}");
                    continue;
                }
            };

            let builder = self.ensure_current();
            if rule.batch_matches {
                match builder.batch_slots.get(&rule_index) {
                    Some(&slot) => merge_batch(&mut builder.steps[slot], &validated),
                    None => {
                        builder.steps.push(validated);
                        let slot = builder.steps.len() - 1;
                        builder.batch_slots.insert(rule_index, slot);
                    }
                }
            } else {
                builder.steps.push(validated);
            }
        }
    }

    fn push_step(&mut self, parsed: Value, input: &DetectInput<'_>) {
        let validated = match validate("step_v3", &parsed, true) {
            Ok(outcome) if outcome.valid => outcome.object,
            Ok(outcome) => {
                warn!(
                    file = %input.file_path.display(),
                    errors = outcome.errors.as_deref().unwrap_or(""),
                    "dropping step statement that fails validation"
                );
                return;
            }
            Err(e) => {
                warn!(file = %input.file_path.display(), "step validation errored: {e}");
                return;
            }
        };
        self.ensure_current().steps.push(validated);
    }

    fn ensure_current(&mut self) -> &mut TestBuilder {
        if self.current.is_none() {
            self.current = Some(TestBuilder::new(Map::new()));
        }
        self.current.as_mut().unwrap()
    }

    fn close_current(&mut self) {
        if let Some(builder) = self.current.take() {
            self.finished.push(builder.finish());
        }
    }
}

impl TestBuilder {
    fn new(mut declared: Map<String, Value>) -> Self {
        if !declared.contains_key("testId") {
            declared.insert("testId".to_string(), Value::String(generate_id("test")));
        }
        let detect_steps = declared
            .get("detectSteps")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        TestBuilder {
            value: declared,
            steps: Vec::new(),
            detect_steps,
            batch_slots: HashMap::new(),
        }
    }

    fn finish(mut self) -> Value {
        self.value.insert("steps".to_string(), Value::Array(self.steps));
        Value::Object(self.value)
    }
}

/// Parse a statement payload as an attribute string, JSON, or YAML, in that
/// order; the first successful parse wins.
fn parse_payload(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return json!({});
    }

    if let Some(attrs) = parse_attributes(trimmed) {
        return attrs;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return value;
        }
    }
    if let Ok(value) = serde_yaml::from_str::<Value>(trimmed) {
        if value.is_object() {
            return value;
        }
    }

    warn!("unparseable statement payload: {trimmed}");
    json!({})
}

/// `key="value"` attribute pairs. Values are coerced to booleans and
/// numbers where they read as such.
fn parse_attributes(input: &str) -> Option<Value> {
    if input.starts_with('{') {
        return None;
    }
    let mut map = Map::new();
    for caps in ATTR_RE.captures_iter(input) {
        let key = caps[1].to_string();
        let raw = &caps[2];
        let value = match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => match raw.parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(raw.to_string()),
            },
        };
        map.insert(key, value);
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

/// Rename legacy test payload fields to their current names.
fn normalize_test_payload(value: Value) -> Map<String, Value> {
    let Value::Object(mut map) = value else {
        return Map::new();
    };
    for (old, new) in [("id", "testId"), ("setup", "before"), ("cleanup", "after")] {
        if let Some(v) = map.remove(old) {
            map.entry(new.to_string()).or_insert(v);
        }
    }
    map
}

/// Substitute `$N` placeholders in a template with captured groups.
fn substitute_placeholders(template: &Value, captures: &[String]) -> Value {
    match template {
        Value::String(s) => {
            let replaced = PLACEHOLDER_RE.replace_all(s, |caps: &regex::Captures<'_>| {
                let index: usize = caps[1].parse().unwrap_or(0);
                captures.get(index).cloned().unwrap_or_default()
            });
            Value::String(replaced.into_owned())
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute_placeholders(v, captures)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_placeholders(v, captures)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Merge a batched match into the combined step: arrays concatenate,
/// objects merge key-wise, scalars keep the first value.
fn merge_batch(existing: &mut Value, incoming: &Value) {
    match (existing, incoming) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(slot) => merge_batch(slot, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(overlay)) => {
            base.extend(overlay.iter().cloned());
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_payload_parses_with_coercion() {
        let value = parse_payload(r#"testId="intro" detectSteps="false" retries="2""#);
        assert_eq!(value["testId"], json!("intro"));
        assert_eq!(value["detectSteps"], json!(false));
        assert_eq!(value["retries"], json!(2));
    }

    #[test]
    fn json_payload_wins_over_yaml() {
        let value = parse_payload(r#"{ "testId": "from-json" }"#);
        assert_eq!(value["testId"], json!("from-json"));
    }

    #[test]
    fn yaml_payload_is_last_resort() {
        let value = parse_payload("testId: from-yaml\ndetectSteps: false");
        assert_eq!(value["testId"], json!("from-yaml"));
        assert_eq!(value["detectSteps"], json!(false));
    }

    #[test]
    fn legacy_payload_fields_are_renamed() {
        let map = normalize_test_payload(json!({ "id": "legacy", "setup": "s.json" }));
        assert_eq!(map["testId"], json!("legacy"));
        assert_eq!(map["before"], json!("s.json"));
        assert!(map.get("id").is_none());
    }

    #[test]
    fn placeholders_substitute_captured_groups() {
        let template = json!({ "typeKeys": { "keys": ["$1"] } });
        let captures = vec!["- press Enter".to_string(), "Enter".to_string()];
        let step = substitute_placeholders(&template, &captures);
        assert_eq!(step, json!({ "typeKeys": { "keys": ["Enter"] } }));
    }

    #[test]
    fn batch_merge_concatenates_arrays() {
        let mut combined = json!({ "typeKeys": { "keys": ["Enter"] } });
        merge_batch(&mut combined, &json!({ "typeKeys": { "keys": ["Tab"] } }));
        assert_eq!(combined["typeKeys"]["keys"], json!(["Enter", "Tab"]));
    }
}
