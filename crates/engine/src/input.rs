//! Input scanning and loading
//!
//! Inputs are explicit files or directories. JSON/YAML documents load as
//! standalone spec or test documents; documentation formats go through the
//! content detector.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use doccheck_common::config::{parse_document, Config};
use doccheck_common::model::{Spec, Test};
use doccheck_common::{generate_id, Error, Result};
use doccheck_detect::{detect_tests, DetectInput};
use doccheck_schema::validate;

/// Scan the configured inputs and load every spec they contain.
pub fn load_inputs(config: &Config) -> Result<Vec<Spec>> {
    let mut files = Vec::new();
    for input in &config.input {
        if !input.exists() {
            return Err(Error::InputNotFound(input.display().to_string()));
        }
        if input.is_dir() {
            let mut walker = WalkDir::new(input);
            if !config.recursive {
                walker = walker.max_depth(1);
            }
            for entry in walker
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                files.push(entry.into_path());
            }
        } else {
            files.push(input.clone());
        }
    }
    files.sort();
    files.dedup();

    let mut specs = Vec::new();
    for file in files {
        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if matches!(ext.as_str(), "json" | "yaml" | "yml") {
            if let Some(spec) = load_document_spec(&file)? {
                specs.push(spec);
            }
        } else if let Some(file_type) = config.file_type_for(&file) {
            let content = std::fs::read_to_string(&file)?;
            let tests = detect_tests(&DetectInput {
                content: &content,
                file_path: &file,
                file_type,
                config,
            })?;
            if tests.is_empty() {
                debug!(file = %file.display(), "no tests detected");
                continue;
            }
            specs.push(Spec {
                spec_id: generate_id("spec"),
                description: None,
                file: Some(file.clone()),
                run_on: Vec::new(),
                tests,
            });
        }
    }
    Ok(specs)
}

/// Load a JSON/YAML file as a standalone spec or test document, if it is
/// one. Other JSON/YAML files (configs, results) are skipped quietly.
fn load_document_spec(path: &Path) -> Result<Option<Spec>> {
    let value = parse_document(path)?;
    let Some(object) = value.as_object() else {
        return Ok(None);
    };

    if object.contains_key("tests") {
        let outcome = validate("spec_v3", &value, true)?;
        if !outcome.valid {
            warn!(
                file = %path.display(),
                errors = outcome.errors.as_deref().unwrap_or(""),
                "skipping invalid spec document"
            );
            return Ok(None);
        }
        let mut spec: Spec = serde_json::from_value(outcome.object)?;
        spec.file = Some(path.to_path_buf());
        return Ok(Some(spec));
    }

    if object.contains_key("steps") || object.contains_key("actions") {
        // `actions` marks a legacy test document; the validator migrates it.
        let outcome = validate("test_v3", &value, true)?;
        if !outcome.valid {
            warn!(
                file = %path.display(),
                errors = outcome.errors.as_deref().unwrap_or(""),
                "skipping invalid test document"
            );
            return Ok(None);
        }
        let test: Test = serde_json::from_value(outcome.object)?;
        return Ok(Some(Spec {
            spec_id: generate_id("spec"),
            description: None,
            file: Some(path.to_path_buf()),
            run_on: Vec::new(),
            tests: vec![test],
        }));
    }

    debug!(file = %path.display(), "not a spec or test document, skipping");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn missing_input_is_fatal() {
        let mut config = Config::default();
        config.input = vec![PathBuf::from("/nonexistent/docs")];
        let err = load_inputs(&config).unwrap_err();
        assert!(matches!(err, Error::InputNotFound(_)));
    }

    #[test]
    fn loads_spec_and_test_documents() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "spec.json",
            r#"{ "specId": "s1", "tests": [{ "steps": [{ "wait": 100 }] }] }"#,
        );
        write(
            dir.path(),
            "test.yaml",
            "testId: standalone\nsteps:\n  - runShell: echo hi\n",
        );
        write(dir.path(), "notes.json", r#"{ "unrelated": true }"#);

        let mut config = Config::default();
        config.input = vec![dir.path().to_path_buf()];
        let specs = load_inputs(&config).unwrap();

        assert_eq!(specs.len(), 2);
        assert!(specs.iter().any(|s| s.spec_id == "s1"));
        assert!(specs
            .iter()
            .any(|s| s.tests.first().map(|t| t.test_id == "standalone").unwrap_or(false)));
    }

    #[test]
    fn legacy_test_document_migrates_on_load() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "legacy.json",
            r#"{ "id": "old", "actions": [{ "action": "goTo", "uri": "https://example.com" }] }"#,
        );

        let mut config = Config::default();
        config.input = vec![dir.path().to_path_buf()];
        let specs = load_inputs(&config).unwrap();

        assert_eq!(specs.len(), 1);
        let test = &specs[0].tests[0];
        assert_eq!(test.test_id, "old");
        assert_eq!(test.steps[0].action.name(), "goTo");
    }

    #[test]
    fn detects_tests_in_markdown_inputs() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "guide.md",
            "<!-- test start testId=\"t\" -->\n<!-- step { \"wait\": 50 } -->\n<!-- test end -->\n",
        );

        let mut config = Config::default();
        config.input = vec![dir.path().to_path_buf()];
        let specs = load_inputs(&config).unwrap();

        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].tests[0].test_id, "t");
    }

    #[test]
    fn non_recursive_scan_stays_shallow() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        write(
            &nested,
            "deep.md",
            "<!-- step { \"wait\": 50 } -->",
        );

        let mut config = Config::default();
        config.input = vec![dir.path().to_path_buf()];
        config.recursive = false;
        let specs = load_inputs(&config).unwrap();
        assert!(specs.is_empty());

        config.recursive = true;
        let specs = load_inputs(&config).unwrap();
        assert_eq!(specs.len(), 1);
    }
}
