//! Schema registry
//!
//! All versioned schema documents are embedded at compile time and compiled
//! into validators once at startup. Looking up a key that is not in the
//! registry is a typed configuration error, not a runtime surprise.

use jsonschema::{Draft, Validator};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;

use doccheck_common::{Error, Result};

/// Embedded schema documents, keyed by `name_vN`.
static SCHEMA_SOURCES: &[(&str, &str)] = &[
    ("step_v3", include_str!("../schemas/step_v3.json")),
    ("test_v3", include_str!("../schemas/test_v3.json")),
    ("spec_v3", include_str!("../schemas/spec_v3.json")),
    ("context_v3", include_str!("../schemas/context_v3.json")),
    ("config_v3", include_str!("../schemas/config_v3.json")),
    ("goTo_v2", include_str!("../schemas/goTo_v2.json")),
    ("find_v2", include_str!("../schemas/find_v2.json")),
    ("httpRequest_v2", include_str!("../schemas/httpRequest_v2.json")),
    ("runShell_v2", include_str!("../schemas/runShell_v2.json")),
    ("saveScreenshot_v2", include_str!("../schemas/saveScreenshot_v2.json")),
    ("test_v2", include_str!("../schemas/test_v2.json")),
];

static REGISTRY: Lazy<SchemaRegistry> = Lazy::new(SchemaRegistry::compile);

/// The process-wide schema registry.
pub fn registry() -> &'static SchemaRegistry {
    &REGISTRY
}

/// One compiled schema.
#[derive(Debug)]
pub struct SchemaEntry {
    key: &'static str,
    document: Value,
    validator: Validator,
}

impl SchemaEntry {
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// The raw schema document, including defaults and examples.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }
}

/// Holds every versioned schema, compiled once.
pub struct SchemaRegistry {
    entries: HashMap<&'static str, SchemaEntry>,
}

impl SchemaRegistry {
    /// Parse and compile every embedded schema. The sources are part of the
    /// binary, so a failure here is a build defect, not an input error.
    fn compile() -> Self {
        let mut entries = HashMap::new();
        for (key, source) in SCHEMA_SOURCES {
            let document: Value = serde_json::from_str(source)
                .unwrap_or_else(|e| panic!("embedded schema {key} is not valid JSON: {e}"));
            let validator = jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&document)
                .unwrap_or_else(|e| panic!("embedded schema {key} failed to compile: {e}"));
            entries.insert(*key, SchemaEntry { key, document, validator });
        }
        SchemaRegistry { entries }
    }

    /// Look up a schema by key.
    pub fn get(&self, key: &str) -> Result<&SchemaEntry> {
        self.entries
            .get(key)
            .ok_or_else(|| Error::SchemaNotFound(key.to_string()))
    }

    /// All registered schema keys, sorted.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Validate every schema's embedded examples against the schema itself.
    pub fn verify_examples(&self) -> Result<()> {
        for entry in self.entries.values() {
            let Some(examples) = entry.document.get("examples").and_then(Value::as_array)
            else {
                continue;
            };
            for (index, example) in examples.iter().enumerate() {
                if !entry.validator.is_valid(example) {
                    return Err(Error::Validation {
                        schema: entry.key.to_string(),
                        errors: format!("embedded example {index} does not validate"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_expected_keys() {
        let keys = registry().keys();
        for expected in ["step_v3", "test_v3", "spec_v3", "context_v3", "config_v3", "test_v2"] {
            assert!(keys.contains(&expected), "missing schema key {expected}");
        }
    }

    #[test]
    fn unknown_key_is_typed_error() {
        let err = registry().get("nonexistent_v9").unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound(_)));
    }

    #[test]
    fn all_embedded_examples_validate() {
        registry().verify_examples().unwrap();
    }
}
