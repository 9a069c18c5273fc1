//! End-to-end execution behavior over the worker pool.

use serde_json::json;

use doccheck_common::config::Config;
use doccheck_common::model::{
    Context, Platform, ResolvedSpec, ResolvedTest, ResolvedTests, Step,
};
use doccheck_common::Outcome;
use doccheck_engine::execute;

fn shell_step(id: &str, command: &str) -> Step {
    serde_json::from_value(json!({ "stepId": id, "runShell": command })).unwrap()
}

fn current_context() -> Context {
    Context { platform: Platform::current(), browser: None }
}

fn foreign_platform() -> Platform {
    if Platform::current() == Platform::Windows {
        Platform::Linux
    } else {
        Platform::Windows
    }
}

fn resolved_with(config: Config, specs: Vec<ResolvedSpec>) -> ResolvedTests {
    ResolvedTests { config, specs }
}

fn spec(spec_id: &str, tests: Vec<ResolvedTest>) -> ResolvedSpec {
    ResolvedSpec { spec_id: spec_id.to_string(), description: None, file: None, tests }
}

fn test(test_id: &str, contexts: Vec<Context>, steps: Vec<Step>) -> ResolvedTest {
    ResolvedTest { test_id: test_id.to_string(), description: None, contexts, steps }
}

#[tokio::test]
async fn failed_step_skips_rest_and_siblings_are_independent() {
    let resolved = resolved_with(
        Config::default(),
        vec![spec(
            "s1",
            vec![
                test(
                    "failing",
                    vec![current_context()],
                    vec![shell_step("a", "exit 1"), shell_step("b", "echo never")],
                ),
                test("passing", vec![current_context()], vec![shell_step("c", "echo ok")]),
            ],
        )],
    );

    let run = execute(&resolved).await.unwrap();

    let failing = &run.specs[0].tests[0];
    assert_eq!(failing.outcome, Outcome::Fail);
    assert_eq!(failing.contexts[0].steps[0].outcome, Outcome::Fail);
    assert_eq!(failing.contexts[0].steps[1].outcome, Outcome::Skipped);

    let passing = &run.specs[0].tests[1];
    assert_eq!(passing.outcome, Outcome::Pass, "sibling test must be unaffected");

    assert_eq!(run.specs[0].outcome, Outcome::Fail);
    assert!(run.failed());
}

#[tokio::test]
async fn unmatchable_context_skips_entire_subtree() {
    let foreign = Context { platform: foreign_platform(), browser: None };
    let resolved = resolved_with(
        Config::default(),
        vec![spec(
            "s1",
            vec![test("t1", vec![foreign], vec![shell_step("a", "echo hi")])],
        )],
    );

    let run = execute(&resolved).await.unwrap();

    assert_eq!(run.specs[0].outcome, Outcome::Skipped);
    assert_eq!(run.specs[0].tests[0].outcome, Outcome::Skipped);
    assert_eq!(run.specs[0].tests[0].contexts[0].outcome, Outcome::Skipped);
    assert_eq!(run.summary.steps.pass, 0);
    assert_eq!(run.summary.tests.pass, 0);
    assert_eq!(run.summary.contexts.pass, 0);
    assert!(!run.failed());
}

#[tokio::test]
async fn unsafe_step_skips_test_and_spec_without_executing() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");

    let unsafe_step: Step = serde_json::from_value(json!({
        "stepId": "danger",
        "unsafe": true,
        "runShell": format!("touch {}", marker.display())
    }))
    .unwrap();

    let resolved = resolved_with(
        Config::default(),
        vec![spec(
            "s1",
            vec![test(
                "t1",
                vec![current_context()],
                vec![unsafe_step, shell_step("b", "echo after")],
            )],
        )],
    );

    let run = execute(&resolved).await.unwrap();

    assert!(!marker.exists(), "unsafe step must never execute");
    assert_eq!(run.specs[0].outcome, Outcome::Skipped);
    assert_eq!(run.specs[0].tests[0].contexts[0].steps[0].outcome, Outcome::Skipped);
    assert_eq!(run.specs[0].tests[0].contexts[0].steps[1].outcome, Outcome::Skipped);
}

#[tokio::test]
async fn allow_unsafe_steps_executes_them() {
    let mut config = Config::default();
    config.allow_unsafe_steps = true;

    let unsafe_step: Step = serde_json::from_value(json!({
        "stepId": "danger",
        "unsafe": true,
        "runShell": "echo allowed"
    }))
    .unwrap();

    let resolved = resolved_with(
        config,
        vec![spec("s1", vec![test("t1", vec![current_context()], vec![unsafe_step])])],
    );

    let run = execute(&resolved).await.unwrap();
    assert_eq!(run.specs[0].outcome, Outcome::Pass);
}

#[tokio::test]
async fn shell_regression_warns_once_and_updates_baseline_above_variation() {
    let dir = tempfile::tempdir().unwrap();
    let baseline = dir.path().join("shell-output.txt");
    std::fs::write(&baseline, "the original stable output\n").unwrap();

    let step: Step = serde_json::from_value(json!({
        "stepId": "capture",
        "runShell": {
            "command": "echo a completely different capture",
            "path": baseline.display().to_string(),
            "maxVariation": 0.1,
            "overwrite": "aboveVariation"
        }
    }))
    .unwrap();

    let resolved = resolved_with(
        Config::default(),
        vec![spec("s1", vec![test("t1", vec![current_context()], vec![step])])],
    );

    let run = execute(&resolved).await.unwrap();

    assert_eq!(run.summary.steps.warning, 1, "exactly one step warning");
    assert_eq!(run.summary.steps.fail, 0, "zero step failures");
    assert_eq!(run.outcome, Outcome::Warning);
    assert!(!run.failed(), "warnings do not affect the exit outcome");

    let updated = std::fs::read_to_string(&baseline).unwrap();
    assert!(updated.contains("a completely different capture"), "baseline replaced");
}

#[tokio::test]
async fn shell_regression_within_threshold_passes_and_keeps_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let baseline = dir.path().join("shell-output.txt");
    std::fs::write(&baseline, "stable output A\n").unwrap();

    let step: Step = serde_json::from_value(json!({
        "stepId": "capture",
        "runShell": {
            "command": "echo stable output B",
            "path": baseline.display().to_string(),
            "maxVariation": 0.5
        }
    }))
    .unwrap();

    let resolved = resolved_with(
        Config::default(),
        vec![spec("s1", vec![test("t1", vec![current_context()], vec![step])])],
    );

    let run = execute(&resolved).await.unwrap();
    assert_eq!(run.outcome, Outcome::Pass);
    assert_eq!(
        std::fs::read_to_string(&baseline).unwrap(),
        "stable output A\n",
        "baseline unchanged when overwrite is unset"
    );
}

#[tokio::test]
async fn concurrent_contexts_all_complete() {
    let mut config = Config::default();
    config.concurrent_runners = doccheck_common::Concurrency::Fixed(4);

    let tests: Vec<ResolvedTest> = (0..6)
        .map(|i| {
            test(
                &format!("t{i}"),
                vec![current_context()],
                vec![shell_step("s", &format!("echo test {i}"))],
            )
        })
        .collect();

    let resolved = resolved_with(config, vec![spec("s1", tests)]);
    let run = execute(&resolved).await.unwrap();

    assert_eq!(run.summary.tests.pass, 6);
    assert_eq!(run.summary.steps.pass, 6);
    assert_eq!(run.outcome, Outcome::Pass);
}
