//! Result tree, aggregation, and the reporter/uploader boundary
//!
//! The result tree mirrors the resolved matrix one level deeper:
//! Run -> Spec -> Test -> Context -> Step. Parent statuses are derived from
//! children; the aggregator walks the tree once and tallies counts at each
//! of the four levels.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use doccheck_common::config::ReportingConfig;
use doccheck_common::{Context, Error, Outcome, Result};

/// Result of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub outcome: Outcome,
    pub description: String,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn skipped(step_id: &str, description: &str) -> Self {
        StepResult {
            step_id: step_id.to_string(),
            outcome: Outcome::Skipped,
            description: description.to_string(),
            duration_ms: 0,
        }
    }
}

/// Result of one test executed in one concrete context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResult {
    pub context: Context,
    pub outcome: Outcome,
    pub steps: Vec<StepResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub outcome: Outcome,
    pub contexts: Vec<ContextResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecResult {
    pub spec_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    pub outcome: Outcome,
    pub tests: Vec<TestResult>,
}

/// The full result document: tree plus summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub started: DateTime<Utc>,
    pub completed: DateTime<Utc>,
    pub outcome: Outcome,
    pub specs: Vec<SpecResult>,
    pub summary: Summary,
}

impl RunResult {
    /// Whether the run should produce a non-zero exit code.
    pub fn failed(&self) -> bool {
        self.outcome.is_failure()
    }
}

/// Pass/fail/warning/skipped tallies at each tree level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub specs: Counts,
    pub tests: Counts,
    pub contexts: Counts,
    pub steps: Counts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub pass: usize,
    pub fail: usize,
    pub warning: usize,
    pub skipped: usize,
}

impl Counts {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Pass => self.pass += 1,
            Outcome::Fail => self.fail += 1,
            Outcome::Warning => self.warning += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.warning + self.skipped
    }
}

/// Derive every parent status from its children and tally the summary.
pub fn aggregate(run: &mut RunResult) {
    let mut summary = Summary::default();

    for spec in &mut run.specs {
        for test in &mut spec.tests {
            for context in &mut test.contexts {
                context.outcome = Outcome::rollup(context.steps.iter().map(|s| s.outcome));
                for step in &context.steps {
                    summary.steps.record(step.outcome);
                }
                summary.contexts.record(context.outcome);
            }
            test.outcome = Outcome::rollup(test.contexts.iter().map(|c| c.outcome));
            summary.tests.record(test.outcome);
        }
        spec.outcome = Outcome::rollup(spec.tests.iter().map(|t| t.outcome));
        summary.specs.record(spec.outcome);
    }

    run.outcome = Outcome::rollup(run.specs.iter().map(|s| s.outcome));
    run.summary = summary;
}

/// Write the result document as JSON. A directory output gets a
/// timestamped file name inside it.
pub fn write_report(run: &RunResult, output: &Path) -> Result<PathBuf> {
    let path = if output.extension().map(|e| e == "json").unwrap_or(false) {
        output.to_path_buf()
    } else {
        std::fs::create_dir_all(output)?;
        let stamp = run.completed.format("%Y%m%d-%H%M%S");
        output.join(format!("doccheck-results-{stamp}.json"))
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(run)?;
    std::fs::write(&path, json)?;

    info!("results written to {}", path.display());
    Ok(path)
}

/// POST the result document to a reporting endpoint.
pub async fn post_report(run: &RunResult, config: &ReportingConfig) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .post(&config.url)
        .bearer_auth(&config.api_key)
        .json(run)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(Error::Api { status: status.as_u16(), message });
    }
    info!("results posted to {}", config.url);
    Ok(())
}

/// An output artifact offered to the CMS upload boundary.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub path: PathBuf,

    /// Integration descriptor the artifact was tagged with
    pub source_integration: String,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub status: Outcome,
    pub description: String,
}

/// Pluggable upload sink with a narrow contract.
#[async_trait]
pub trait Uploader: Send + Sync {
    fn can_handle(&self, source: &str) -> bool;

    async fn upload(&self, file: &UploadFile) -> Result<UploadOutcome>;
}

/// Routes tagged artifacts to the first uploader that claims them.
#[derive(Default)]
pub struct UploaderRegistry {
    handlers: Vec<Box<dyn Uploader>>,
}

impl UploaderRegistry {
    pub fn register(&mut self, handler: Box<dyn Uploader>) {
        self.handlers.push(handler);
    }

    /// Upload an artifact. No handler claiming the descriptor is a skip,
    /// not a failure.
    pub async fn upload(&self, file: &UploadFile) -> UploadOutcome {
        for handler in &self.handlers {
            if handler.can_handle(&file.source_integration) {
                return match handler.upload(file).await {
                    Ok(outcome) => outcome,
                    Err(e) => UploadOutcome {
                        status: Outcome::Warning,
                        description: format!("upload failed: {e}"),
                    },
                };
            }
        }
        debug!(
            source = %file.source_integration,
            "no uploader registered for artifact, skipping"
        );
        UploadOutcome {
            status: Outcome::Skipped,
            description: format!("no handler for {}", file.source_integration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, outcome: Outcome) -> StepResult {
        StepResult {
            step_id: id.to_string(),
            outcome,
            description: String::new(),
            duration_ms: 1,
        }
    }

    fn run_with_steps(steps: Vec<StepResult>) -> RunResult {
        RunResult {
            started: Utc::now(),
            completed: Utc::now(),
            outcome: Outcome::Skipped,
            specs: vec![SpecResult {
                spec_id: "s1".to_string(),
                description: None,
                file: None,
                outcome: Outcome::Skipped,
                tests: vec![TestResult {
                    test_id: "t1".to_string(),
                    description: None,
                    outcome: Outcome::Skipped,
                    contexts: vec![ContextResult {
                        context: Context {
                            platform: doccheck_common::Platform::Linux,
                            browser: None,
                        },
                        outcome: Outcome::Skipped,
                        steps,
                    }],
                }],
            }],
            summary: Summary::default(),
        }
    }

    #[test]
    fn aggregate_rolls_up_fail_and_counts() {
        let mut run = run_with_steps(vec![
            step("a", Outcome::Pass),
            step("b", Outcome::Fail),
            step("c", Outcome::Skipped),
        ]);
        aggregate(&mut run);

        assert_eq!(run.outcome, Outcome::Fail);
        assert_eq!(run.specs[0].outcome, Outcome::Fail);
        assert_eq!(run.summary.steps.pass, 1);
        assert_eq!(run.summary.steps.fail, 1);
        assert_eq!(run.summary.steps.skipped, 1);
        assert_eq!(run.summary.contexts.fail, 1);
        assert_eq!(run.summary.tests.fail, 1);
        assert_eq!(run.summary.specs.fail, 1);
        assert!(run.failed());
    }

    #[test]
    fn aggregate_warning_does_not_fail_run() {
        let mut run = run_with_steps(vec![step("a", Outcome::Pass), step("b", Outcome::Warning)]);
        aggregate(&mut run);

        assert_eq!(run.outcome, Outcome::Warning);
        assert!(!run.failed());
    }

    #[test]
    fn aggregate_all_skipped_subtree() {
        let mut run = run_with_steps(vec![step("a", Outcome::Skipped), step("b", Outcome::Skipped)]);
        aggregate(&mut run);

        assert_eq!(run.specs[0].outcome, Outcome::Skipped);
        assert_eq!(run.specs[0].tests[0].outcome, Outcome::Skipped);
        assert_eq!(run.specs[0].tests[0].contexts[0].outcome, Outcome::Skipped);
        assert_eq!(run.summary.steps.pass, 0);
        assert_eq!(run.summary.contexts.pass, 0);
    }

    #[test]
    fn write_report_into_directory_uses_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = run_with_steps(vec![step("a", Outcome::Pass)]);
        aggregate(&mut run);

        let path = write_report(&run, dir.path()).unwrap();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("doccheck-results-"));

        let parsed: RunResult =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.summary.steps.pass, 1);
    }

    struct NullUploader;

    #[async_trait]
    impl Uploader for NullUploader {
        fn can_handle(&self, source: &str) -> bool {
            source == "cms"
        }

        async fn upload(&self, _file: &UploadFile) -> Result<UploadOutcome> {
            Ok(UploadOutcome { status: Outcome::Pass, description: "uploaded".to_string() })
        }
    }

    #[tokio::test]
    async fn uploader_registry_skips_unknown_sources() {
        let mut registry = UploaderRegistry::default();
        registry.register(Box::new(NullUploader));

        let handled = registry
            .upload(&UploadFile { path: "shot.png".into(), source_integration: "cms".to_string() })
            .await;
        assert_eq!(handled.status, Outcome::Pass);

        let skipped = registry
            .upload(&UploadFile {
                path: "shot.png".into(),
                source_integration: "unknown".to_string(),
            })
            .await;
        assert_eq!(skipped.status, Outcome::Skipped);
    }
}
