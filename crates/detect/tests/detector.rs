//! Detection behavior over realistic markdown and asciidoc sources.

use std::path::Path;

use doccheck_common::config::Config;
use doccheck_common::Action;
use doccheck_detect::{detect_tests, DetectInput};

fn markdown_input<'a>(content: &'a str, config: &'a Config) -> DetectInput<'a> {
    let file_type = config
        .file_types
        .iter()
        .find(|ft| ft.name == "markdown")
        .expect("markdown file type");
    DetectInput {
        content,
        file_path: Path::new("docs/guide.md"),
        file_type,
        config,
    }
}

const GUIDE: &str = r#"
# Getting started

<!-- test start testId="getting-started" -->

Open [the docs](https://example.com/docs) to begin.

Click **Submit** to continue.

```bash
echo installing
```

<!-- step { "wait": 250 } -->

<!-- test end -->

<!-- test start {"testId": "second", "detectSteps": false} -->

This bold **Ignored Button** must not become a step.

<!-- step { "runShell": "echo explicit" } -->

<!-- test end -->
"#;

#[test]
fn detects_tests_steps_and_markup() {
    let config = Config::default();
    let tests = detect_tests(&markdown_input(GUIDE, &config)).unwrap();
    assert_eq!(tests.len(), 2);

    let first = &tests[0];
    assert_eq!(first.test_id, "getting-started");
    let actions: Vec<&str> = first.steps.iter().map(|s| s.action.name()).collect();
    assert_eq!(actions, vec!["checkLink", "find", "runShell", "wait"]);

    match &first.steps[0].action {
        Action::CheckLink(link) => {
            assert_eq!(link.detail().url, "https://example.com/docs");
        }
        other => panic!("expected checkLink, got {}", other.name()),
    }

    let second = &tests[1];
    assert_eq!(second.test_id, "second");
    assert!(!second.detect_steps);
    let actions: Vec<&str> = second.steps.iter().map(|s| s.action.name()).collect();
    assert_eq!(actions, vec!["runShell"], "markup suppressed when detectSteps is false");
}

#[test]
fn detection_is_deterministic_excluding_ids() {
    let config = Config::default();
    let first = detect_tests(&markdown_input(GUIDE, &config)).unwrap();
    let second = detect_tests(&markdown_input(GUIDE, &config)).unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        let a_actions: Vec<&str> = a.steps.iter().map(|s| s.action.name()).collect();
        let b_actions: Vec<&str> = b.steps.iter().map(|s| s.action.name()).collect();
        assert_eq!(a_actions, b_actions);
    }
}

#[test]
fn ignore_block_suppresses_statements_and_markup() {
    let content = r#"
<!-- test start testId="with-ignore" -->

<!-- step { "wait": 100 } -->

<!-- test ignore start -->

A [link](https://example.com/skipped) and a **Skipped Button**.

<!-- step { "wait": 999 } -->

<!-- test ignore end -->

<!-- step { "wait": 200 } -->

<!-- test end -->
"#;
    let config = Config::default();
    let tests = detect_tests(&markdown_input(content, &config)).unwrap();
    assert_eq!(tests.len(), 1);

    let steps = &tests[0].steps;
    assert_eq!(steps.len(), 2);
    for step in steps {
        match &step.action {
            Action::Wait(wait) => assert_ne!(wait.duration(), 999),
            other => panic!("unexpected action {}", other.name()),
        }
    }
}

#[test]
fn step_without_test_start_creates_implicit_test() {
    let content = r#"<!-- step { "runShell": "echo implicit" } -->"#;
    let config = Config::default();
    let tests = detect_tests(&markdown_input(content, &config)).unwrap();
    assert_eq!(tests.len(), 1);
    assert!(tests[0].test_id.starts_with("test-"));
    assert_eq!(tests[0].steps.len(), 1);
}

#[test]
fn invalid_step_is_dropped_not_fatal() {
    let content = r#"
<!-- test start testId="partial" -->
<!-- step { "notAnAction": true } -->
<!-- step { "wait": 100 } -->
<!-- test end -->
"#;
    let config = Config::default();
    let tests = detect_tests(&markdown_input(content, &config)).unwrap();
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].steps.len(), 1);
}

#[test]
fn test_with_no_valid_steps_is_dropped() {
    let content = r#"
<!-- test start testId="empty" -->
<!-- test end -->
"#;
    let config = Config::default();
    let tests = detect_tests(&markdown_input(content, &config)).unwrap();
    assert!(tests.is_empty());
}

#[test]
fn legacy_test_start_payload_migrates() {
    let content = r#"
<!-- test start id="legacy-intro" -->
<!-- step { "action": "goTo", "uri": "https://example.com" } -->
<!-- test end -->
"#;
    let config = Config::default();
    let tests = detect_tests(&markdown_input(content, &config)).unwrap();
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].test_id, "legacy-intro");
    match &tests[0].steps[0].action {
        Action::GoTo(goto) => assert_eq!(goto.url(), "https://example.com"),
        other => panic!("expected goTo, got {}", other.name()),
    }
}

#[test]
fn batch_rule_combines_matches_into_one_step() {
    let content = r#"
<!-- test start testId="keys" -->

To save, do the following:

- press Control+s
- press Enter

<!-- test end -->
"#;
    let config = Config::default();
    let tests = detect_tests(&markdown_input(content, &config)).unwrap();
    assert_eq!(tests.len(), 1);

    let type_keys: Vec<_> = tests[0]
        .steps
        .iter()
        .filter_map(|s| match &s.action {
            Action::TypeKeys(tk) => Some(tk.keys()),
            _ => None,
        })
        .collect();
    assert_eq!(type_keys.len(), 1, "batched matches collapse into one step");
    assert_eq!(type_keys[0], vec!["Control+s".to_string(), "Enter".to_string()]);
}

#[test]
fn config_detect_steps_false_suppresses_markup_globally() {
    let content = r#"
<!-- test start testId="no-markup" -->
A [link](https://example.com/docs) here.
<!-- step { "wait": 100 } -->
<!-- test end -->
"#;
    let mut config = Config::default();
    config.detect_steps = false;
    let tests = detect_tests(&markdown_input(content, &config)).unwrap();
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].steps.len(), 1);
    assert_eq!(tests[0].steps[0].action.name(), "wait");
}

#[test]
fn asciidoc_statements_and_markup_detect() {
    let content = r#"
// test start testId="adoc"

Visit link:https://example.com/manual[the manual].

[source,bash]
----
echo from-asciidoc
----

// test end
"#;
    let config = Config::default();
    let file_type = config.file_types.iter().find(|ft| ft.name == "asciidoc").unwrap();
    let input = DetectInput {
        content,
        file_path: Path::new("docs/manual.adoc"),
        file_type,
        config: &config,
    };
    let tests = detect_tests(&input).unwrap();
    assert_eq!(tests.len(), 1);
    let actions: Vec<&str> = tests[0].steps.iter().map(|s| s.action.name()).collect();
    assert!(actions.contains(&"checkLink"));
    assert!(actions.contains(&"runShell"));
}
