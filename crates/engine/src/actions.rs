//! Action handlers
//!
//! Each step action has exactly one handler; dispatch is a match over the
//! closed action enum. Handlers return `StepExec` outcomes for ordinary
//! action failures and reserve `Err` for session and IO breakage.

use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use doccheck_common::model::{
    Action, CheckLinkDetail, CodeLanguage, Find, GoTo, HttpRequest, LoadVariables, OverwriteMode,
    Platform, Record, RunCode, RunShell, Screenshot, Step, TypeKeys, Wait,
};
use doccheck_common::Result;

use crate::regression;
use crate::report::UploadFile;
use crate::runner::{Runner, StepExec};

/// Regression policy shared by shell and code output capture.
struct OutputPolicy {
    exit_codes: Vec<i32>,
    expected_output: Option<String>,
    baseline: Option<PathBuf>,
    max_variation: f64,
    overwrite: OverwriteMode,
}

impl Runner {
    /// Route a step to its action handler.
    pub(crate) async fn dispatch(&mut self, step: &Step) -> Result<StepExec> {
        match &step.action {
            Action::GoTo(action) => self.action_go_to(action).await,
            Action::Find(action) => self.action_find(action).await,
            Action::HttpRequest(action) => self.action_http_request(action).await,
            Action::RunShell(action) => self.action_run_shell(action).await,
            Action::RunCode(action) => self.action_run_code(action).await,
            Action::TypeKeys(action) => self.action_type_keys(action).await,
            Action::Screenshot(action) => self.action_screenshot(step, action).await,
            Action::Record(action) => self.action_record(action).await,
            Action::StopRecord(_) => self.action_stop_record().await,
            Action::Wait(action) => self.action_wait(action).await,
            Action::CheckLink(action) => self.action_check_link(action).await,
            Action::LoadVariables(action) => self.action_load_variables(action).await,
        }
    }

    async fn action_go_to(&mut self, action: &GoTo) -> Result<StepExec> {
        let mut url = self.resolve_text(action.url());
        if let Some(origin) = action.origin() {
            if !url.contains("://") {
                url = format!("{}/{}", origin.trim_end_matches('/'), url.trim_start_matches('/'));
            }
        }

        let session = self.session().await?;
        session.navigate(&url).await?;
        Ok(StepExec::pass(format!("navigated to {url}")))
    }

    async fn action_find(&mut self, action: &Find) -> Result<StepExec> {
        let detail = action.detail();
        let selector = self.resolve_text(&detail.selector);
        let expected_text = detail.element_text.as_deref().map(|t| self.resolve_text(t));
        let keys: Option<Vec<String>> = detail
            .type_keys
            .as_ref()
            .map(|k| k.to_vec().iter().map(|key| self.resolve_text(key)).collect());

        let deadline = Duration::from_millis(detail.timeout);
        let start = std::time::Instant::now();
        let session = self.session().await?;

        let element = loop {
            match session.find_element(&selector).await {
                Ok(element) => break element,
                Err(_) if start.elapsed() < deadline => sleep(Duration::from_millis(250)).await,
                Err(_) => {
                    return Ok(StepExec::fail(format!(
                        "no element matched '{selector}' within {}ms",
                        detail.timeout
                    )));
                }
            }
        };

        let text = session.element_text(&element).await.unwrap_or_default();
        if let Some(expected) = &expected_text {
            if text.trim() != expected.trim() {
                return Ok(StepExec::fail(format!(
                    "element text '{}' does not match expected '{}'",
                    text.trim(),
                    expected
                )));
            }
        }

        if detail.move_to {
            session.move_to(&element).await?;
        }
        if detail.click {
            session.click(&element).await?;
        }
        if let Some(keys) = &keys {
            session.send_keys(Some(&element), keys).await?;
        }

        Ok(StepExec::pass(format!("found element '{selector}'"))
            .with_outputs(json!({ "elementText": text })))
    }

    async fn action_http_request(&mut self, action: &HttpRequest) -> Result<StepExec> {
        let detail = action.detail();
        let url = self.resolve_text(&detail.request.url);
        let method = reqwest::Method::from_bytes(detail.request.method.to_uppercase().as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let body = detail.request.body.as_ref().map(|b| self.resolve_deep(b));

        let client = reqwest::Client::builder().build()?;
        let mut request = client.request(method.clone(), &url);
        for (name, value) in &detail.request.headers {
            request = request.header(name, self.resolve_text(value));
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(StepExec::fail(format!("{method} {url} failed: {e}"))),
        };

        let status = response.status().as_u16();
        let mut header_map = Map::new();
        for (name, value) in response.headers() {
            header_map.insert(
                name.to_string(),
                Value::String(value.to_str().unwrap_or_default().to_string()),
            );
        }
        let body_text = response.text().await.unwrap_or_default();
        let body_json: Value =
            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text.clone()));

        let outputs = json!({
            "response": { "status": status, "headers": header_map, "body": body_json }
        });

        let expectation = detail.response.unwrap_or_default();
        if !expectation.status_codes.contains(&status) {
            return Ok(StepExec::fail(format!(
                "{method} {url} returned {status}, expected one of {:?}",
                expectation.status_codes
            ))
            .with_outputs(outputs));
        }
        for (name, expected) in &expectation.headers {
            let actual = outputs
                .pointer("/response/headers")
                .and_then(|h| h.get(name.to_ascii_lowercase()))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if actual != expected {
                return Ok(StepExec::fail(format!(
                    "response header '{name}' is '{actual}', expected '{expected}'"
                ))
                .with_outputs(outputs));
            }
        }
        if let Some(expected_body) = &expectation.body {
            let expected_body = self.resolve_deep(expected_body);
            if !contains_subset(&expected_body, &body_json) {
                return Ok(StepExec::fail("response body does not contain expected value")
                    .with_outputs(outputs));
            }
        }

        Ok(StepExec::pass(format!("{method} {url} returned {status}")).with_outputs(outputs))
    }

    async fn action_run_shell(&mut self, action: &RunShell) -> Result<StepExec> {
        let detail = action.detail();
        let command = self.resolve_text(&detail.command);

        let (shell, flag) = match self.context().platform {
            Platform::Windows => ("cmd", "/C"),
            _ => ("sh", "-c"),
        };
        let mut cmd = tokio::process::Command::new(shell);
        cmd.arg(flag).arg(&command).kill_on_drop(true);
        if let Some(dir) = &detail.working_directory {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;
        let policy = OutputPolicy {
            exit_codes: detail.exit_codes,
            expected_output: detail.output.map(|o| self.resolve_text(&o)),
            baseline: detail.path,
            max_variation: detail.max_variation,
            overwrite: detail.overwrite,
        };
        score_process(&command, &policy, &output)
    }

    async fn action_run_code(&mut self, action: &RunCode) -> Result<StepExec> {
        let code = self.resolve_text(&action.code);
        let extension = match action.language {
            CodeLanguage::Bash => "sh",
            CodeLanguage::Python => "py",
            CodeLanguage::Javascript => "js",
        };

        let dir = tempfile::tempdir()?;
        let script = dir.path().join(format!("snippet.{extension}"));
        std::fs::write(&script, &code)?;

        let mut cmd = tokio::process::Command::new(action.language.interpreter());
        cmd.arg(&script).kill_on_drop(true);
        if let Some(working_dir) = &action.working_directory {
            cmd.current_dir(working_dir);
        }

        let output = cmd.output().await?;
        let policy = OutputPolicy {
            exit_codes: action.exit_codes.clone(),
            expected_output: action.output.as_ref().map(|o| self.resolve_text(o)),
            baseline: action.path.clone(),
            max_variation: action.max_variation,
            overwrite: action.overwrite,
        };
        score_process(action.language.interpreter(), &policy, &output)
    }

    async fn action_type_keys(&mut self, action: &TypeKeys) -> Result<StepExec> {
        let keys: Vec<String> = action.keys().iter().map(|k| self.resolve_text(k)).collect();
        let session = self.session().await?;
        session.send_keys(None, &keys).await?;
        Ok(StepExec::pass(format!("sent {} key sequence(s)", keys.len())))
    }

    async fn action_screenshot(&mut self, step: &Step, action: &Screenshot) -> Result<StepExec> {
        let detail = action.detail();
        let path = detail
            .path
            .unwrap_or_else(|| {
                self.config()
                    .output
                    .join("screenshots")
                    .join(format!("{}.png", step.step_id))
            });

        let session = self.session().await?;
        let bytes = session.screenshot().await?;

        let comparison =
            regression::compare_image(&path, &bytes, detail.max_variation, detail.overwrite)?;
        let mut outcome = comparison.outcome;
        let mut description = comparison.description;

        // Tagged artifacts are offered to the upload boundary; a missing
        // handler is a skip, a failed upload degrades the step to a warning.
        if let Some(source) = &detail.source_integration {
            let uploaded = self
                .uploaders
                .upload(&UploadFile {
                    path: path.clone(),
                    source_integration: source.clone(),
                })
                .await;
            match uploaded.status {
                doccheck_common::Outcome::Warning if outcome == doccheck_common::Outcome::Pass => {
                    outcome = doccheck_common::Outcome::Warning;
                }
                _ => {}
            }
            description = format!("{description}; {}", uploaded.description);
        }

        Ok(StepExec {
            outcome,
            description,
            outputs: json!({ "screenshot": path.display().to_string() }),
        })
    }

    /// Recording depends on driver support; an unavailable recorder is a
    /// warning, never a failure.
    async fn action_record(&mut self, action: &Record) -> Result<StepExec> {
        let path = action.path();
        let session = self.session().await?;
        match session.start_recording(&path).await {
            Ok(()) => Ok(StepExec::pass(format!("recording to {}", path.display()))),
            Err(e) => Ok(StepExec::warning(format!("recording unavailable: {e}"))),
        }
    }

    async fn action_stop_record(&mut self) -> Result<StepExec> {
        let session = self.session().await?;
        match session.stop_recording().await {
            Ok(()) => Ok(StepExec::pass("recording stopped")),
            Err(e) => Ok(StepExec::warning(format!("recording unavailable: {e}"))),
        }
    }

    async fn action_wait(&mut self, action: &Wait) -> Result<StepExec> {
        let duration = action.duration();
        sleep(Duration::from_millis(duration)).await;
        Ok(StepExec::pass(format!("waited {duration}ms")))
    }

    async fn action_check_link(&mut self, action: &doccheck_common::model::CheckLink) -> Result<StepExec> {
        let detail: CheckLinkDetail = action.detail();
        let mut url = self.resolve_text(&detail.url);
        if !url.contains("://") {
            if let Some(origin) = &detail.origin {
                url = format!("{}/{}", origin.trim_end_matches('/'), url.trim_start_matches('/'));
            }
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let response = match client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(StepExec::fail(format!("GET {url} failed: {e}"))),
        };

        let status = response.status().as_u16();
        let outputs = json!({ "status": status });
        if detail.status_codes.contains(&status) {
            Ok(StepExec::pass(format!("{url} returned {status}")).with_outputs(outputs))
        } else {
            Ok(StepExec::fail(format!(
                "{url} returned {status}, expected one of {:?}",
                detail.status_codes
            ))
            .with_outputs(outputs))
        }
    }

    async fn action_load_variables(&mut self, action: &LoadVariables) -> Result<StepExec> {
        let path = action.path();
        let content = std::fs::read_to_string(&path)?;

        let mut loaded = 0usize;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((name, value)) = line.split_once('=') {
                self.vars.insert(
                    name.trim().to_string(),
                    Value::String(value.trim().trim_matches('"').to_string()),
                );
                loaded += 1;
            }
        }

        info!("loaded {loaded} variables from {}", path.display());
        Ok(StepExec::pass(format!("loaded {loaded} variables from {}", path.display())))
    }

    /// Resolve every string inside a JSON value through the expression
    /// evaluator.
    fn resolve_deep(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                let ctx = Value::Object(self.vars.clone());
                doccheck_common::expression::resolve_str(s, &ctx)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_deep(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), self.resolve_deep(v))).collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Score a finished process against exit codes, expected output, and the
/// optional output baseline.
fn score_process(
    label: &str,
    policy: &OutputPolicy,
    output: &std::process::Output,
) -> Result<StepExec> {
    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let outputs = json!({ "stdout": stdout, "stderr": stderr, "exitCode": exit_code });

    if !policy.exit_codes.contains(&exit_code) {
        return Ok(StepExec::fail(format!(
            "'{label}' exited with {exit_code}, expected one of {:?}: {}",
            policy.exit_codes,
            stderr.trim()
        ))
        .with_outputs(outputs));
    }

    if let Some(expected) = &policy.expected_output {
        let combined = format!("{stdout}{stderr}");
        if !combined.contains(expected.as_str()) {
            return Ok(StepExec::fail(format!("output does not contain '{expected}'"))
                .with_outputs(outputs));
        }
    }

    if let Some(baseline) = &policy.baseline {
        let comparison = regression::compare_text(
            baseline,
            &stdout,
            policy.max_variation,
            policy.overwrite,
        )?;
        return Ok(StepExec {
            outcome: comparison.outcome,
            description: comparison.description,
            outputs,
        });
    }

    Ok(StepExec::pass(format!("'{label}' exited with {exit_code}")).with_outputs(outputs))
}

/// Whether `expected` is structurally contained in `actual`: objects by
/// key subset, arrays by membership, scalars by equality.
fn contains_subset(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => exp
            .iter()
            .all(|(key, value)| act.get(key).map(|a| contains_subset(value, a)).unwrap_or(false)),
        (Value::Array(exp), Value::Array(act)) => exp
            .iter()
            .all(|value| act.iter().any(|a| contains_subset(value, a))),
        (exp, act) => exp == act,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doccheck_common::config::Config;
    use doccheck_common::model::Context;
    use doccheck_common::Outcome;
    use serde_json::json;
    use std::sync::Arc;

    fn runner() -> Runner {
        Runner::new(
            Context { platform: Platform::current(), browser: None },
            Arc::new(Config::default()),
        )
    }

    fn step(value: Value) -> Step {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn subset_matching() {
        assert!(contains_subset(&json!({ "a": 1 }), &json!({ "a": 1, "b": 2 })));
        assert!(!contains_subset(&json!({ "a": 2 }), &json!({ "a": 1 })));
        assert!(contains_subset(&json!([2]), &json!([1, 2, 3])));
        assert!(contains_subset(&json!("x"), &json!("x")));
        assert!(!contains_subset(&json!({ "a": { "b": 1 } }), &json!({ "a": {} })));
    }

    #[tokio::test]
    async fn run_shell_scores_exit_codes() {
        let mut runner = runner();

        let ok = runner.run_step(&step(json!({ "runShell": "true" }))).await;
        assert_eq!(ok.outcome, Outcome::Pass);

        let bad = runner.run_step(&step(json!({ "runShell": "exit 7" }))).await;
        assert_eq!(bad.outcome, Outcome::Fail);

        let allowed = runner
            .run_step(&step(json!({ "runShell": { "command": "exit 7", "exitCodes": [7] } })))
            .await;
        assert_eq!(allowed.outcome, Outcome::Pass);
    }

    #[tokio::test]
    async fn run_shell_checks_expected_output() {
        let mut runner = runner();
        let found = runner
            .run_step(&step(json!({
                "runShell": { "command": "echo deployment complete", "output": "complete" }
            })))
            .await;
        assert_eq!(found.outcome, Outcome::Pass);

        let missing = runner
            .run_step(&step(json!({
                "runShell": { "command": "echo something else", "output": "complete" }
            })))
            .await;
        assert_eq!(missing.outcome, Outcome::Fail);
    }

    #[tokio::test]
    async fn run_shell_regression_baseline_flow() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("output.txt");
        let mut runner = runner();

        // First run creates the baseline and passes.
        let first = runner
            .run_step(&step(json!({
                "runShell": { "command": "echo stable output", "path": baseline.display().to_string() }
            })))
            .await;
        assert_eq!(first.outcome, Outcome::Pass);
        assert!(baseline.exists());

        // A divergent run warns but does not fail.
        let second = runner
            .run_step(&step(json!({
                "runShell": {
                    "command": "echo completely different text here",
                    "path": baseline.display().to_string(),
                    "maxVariation": 0.1
                }
            })))
            .await;
        assert_eq!(second.outcome, Outcome::Warning);
    }

    #[tokio::test]
    async fn shell_output_feeds_variables_and_expressions() {
        let mut runner = runner();
        let capture = runner
            .run_step(&step(json!({
                "runShell": "printf 'build 42 done'",
                "variables": { "build": "{{extract($$stdout, 'build ([0-9]+)')}}" }
            })))
            .await;
        assert_eq!(capture.outcome, Outcome::Pass);

        let uses = runner
            .run_step(&step(json!({
                "runShell": { "command": "echo build-$$build", "output": "build-42" }
            })))
            .await;
        assert_eq!(uses.outcome, Outcome::Pass, "{}", uses.description);
    }

    #[tokio::test]
    async fn load_variables_reads_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join("vars.env");
        std::fs::write(&env_file, "# comment\nNAME=doccheck\nTOKEN=\"secret\"\n").unwrap();

        let mut runner = runner();
        let result = runner
            .run_step(&step(json!({ "loadVariables": env_file.display().to_string() })))
            .await;
        assert_eq!(result.outcome, Outcome::Pass);
        assert_eq!(runner.vars.get("NAME"), Some(&json!("doccheck")));
        assert_eq!(runner.vars.get("TOKEN"), Some(&json!("secret")));
    }

    #[tokio::test]
    async fn run_code_executes_snippets() {
        let mut runner = runner();
        let result = runner
            .run_step(&step(json!({
                "runCode": {
                    "language": "bash",
                    "code": "echo from-bash",
                    "output": "from-bash"
                }
            })))
            .await;
        assert_eq!(result.outcome, Outcome::Pass, "{}", result.description);
    }
}
