//! Per-context runner
//!
//! One runner is bound to each concrete context. Its automation session is
//! created lazily on the first browser action and torn down deterministically
//! and idempotently after the context's tests complete.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use doccheck_common::config::Config;
use doccheck_common::model::{Context, ResolvedTest, Step};
use doccheck_common::{expression, Error, Outcome, Result};

use crate::driver::{DriverProcess, Session, WebDriverSession};
use crate::report::{StepResult, UploaderRegistry};

/// Default per-step timeout when the step declares none.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Outcome of one action dispatch, before retry/timeout policy.
#[derive(Debug, Clone)]
pub struct StepExec {
    pub outcome: Outcome,
    pub description: String,

    /// Captured outputs offered to variable expressions (stdout, response, ...)
    pub outputs: Value,
}

impl StepExec {
    pub fn pass(description: impl Into<String>) -> Self {
        StepExec { outcome: Outcome::Pass, description: description.into(), outputs: Value::Null }
    }

    pub fn fail(description: impl Into<String>) -> Self {
        StepExec { outcome: Outcome::Fail, description: description.into(), outputs: Value::Null }
    }

    pub fn warning(description: impl Into<String>) -> Self {
        StepExec { outcome: Outcome::Warning, description: description.into(), outputs: Value::Null }
    }

    pub fn with_outputs(mut self, outputs: Value) -> Self {
        self.outputs = outputs;
        self
    }
}

/// A live execution slot for one concrete context.
pub struct Runner {
    context: Context,
    config: Arc<Config>,
    driver: Option<DriverProcess>,
    session: Option<Box<dyn Session>>,
    pub(crate) uploaders: Arc<UploaderRegistry>,
    pub(crate) vars: Map<String, Value>,
}

impl Runner {
    pub fn new(context: Context, config: Arc<Config>) -> Self {
        Runner {
            context,
            config,
            driver: None,
            session: None,
            uploaders: Arc::new(UploaderRegistry::default()),
            vars: Map::new(),
        }
    }

    /// Attach an uploader registry for tagged output artifacts.
    pub fn with_uploaders(mut self, uploaders: Arc<UploaderRegistry>) -> Self {
        self.uploaders = uploaders;
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// The automation session, created on first use.
    pub(crate) async fn session(&mut self) -> Result<&mut (dyn Session + '_)> {
        if self.session.is_none() {
            let browser = self.context.browser.clone().ok_or_else(|| {
                Error::Session("context declares no browser for a browser action".to_string())
            })?;
            let driver = DriverProcess::spawn(browser.name, self.config.debug).await?;
            let session = WebDriverSession::create(&driver, &browser).await?;
            self.driver = Some(driver);
            self.session = Some(Box::new(session));
        }
        Ok(self.session.as_mut().expect("session just created").as_mut())
    }

    /// Install a pre-built session. Used by tests to substitute a fake
    /// driver boundary.
    pub fn with_session(mut self, session: Box<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Tear the runner down. Idempotent; repeated calls do nothing.
    pub async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                debug!("session close failed: {e}");
            }
        }
        if let Some(mut driver) = self.driver.take() {
            driver.stop();
        }
    }

    /// Execute one test's steps sequentially.
    ///
    /// A failed step skips every subsequent step in the test. A test
    /// containing an unsafe step is skipped entirely unless the config
    /// allows unsafe steps.
    pub async fn run_test(&mut self, test: &ResolvedTest) -> Vec<StepResult> {
        if !self.config.allow_unsafe_steps && test.steps.iter().any(|s| s.unsafe_) {
            warn!(
                test = %test.test_id,
                "skipping test: contains an unsafe step and allowUnsafeSteps is false"
            );
            return test
                .steps
                .iter()
                .map(|s| {
                    StepResult::skipped(
                        &s.step_id,
                        "test contains an unsafe step and allowUnsafeSteps is false",
                    )
                })
                .collect();
        }

        let mut results = Vec::with_capacity(test.steps.len());
        let mut failed = false;
        for step in &test.steps {
            if failed {
                results.push(StepResult::skipped(&step.step_id, "skipped after earlier failure"));
                continue;
            }
            let result = self.run_step(step).await;
            failed = result.outcome == Outcome::Fail;
            results.push(result);
        }
        results
    }

    /// Execute one step with timeout and retry policy, then capture its
    /// declared variables.
    pub async fn run_step(&mut self, step: &Step) -> StepResult {
        let start = Instant::now();
        let timeout_ms = step.timeout.unwrap_or(DEFAULT_STEP_TIMEOUT_MS);
        let attempts = step.retries.saturating_add(1);

        let mut exec = StepExec::fail("step did not execute");
        for attempt in 0..attempts {
            let dispatched = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.dispatch(step),
            )
            .await;

            exec = match dispatched {
                Ok(Ok(exec)) => exec,
                Ok(Err(e)) => StepExec::fail(e.to_string()),
                // The dispatch future is dropped here; child processes are
                // spawned with kill_on_drop, so cancellation is active.
                Err(_) => StepExec::fail(Error::StepTimeout { ms: timeout_ms }.to_string()),
            };

            if exec.outcome != Outcome::Fail {
                break;
            }
            if attempt + 1 < attempts {
                debug!(step = %step.step_id, attempt, "step failed, retrying");
            }
        }

        if exec.outcome != Outcome::Fail {
            self.capture_variables(step, &exec.outputs);
        }

        StepResult {
            step_id: step.step_id.clone(),
            outcome: exec.outcome,
            description: exec.description,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The expression context: captured variables plus the latest outputs.
    pub(crate) fn expression_context(&self, outputs: &Value) -> Value {
        let mut ctx = self.vars.clone();
        if let Value::Object(out) = outputs {
            for (key, value) in out {
                ctx.insert(key.clone(), value.clone());
            }
        }
        Value::Object(ctx)
    }

    /// Resolve a string field through the expression evaluator.
    pub(crate) fn resolve_text(&self, input: &str) -> String {
        let ctx = Value::Object(self.vars.clone());
        match expression::resolve_str(input, &ctx) {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }

    fn capture_variables(&mut self, step: &Step, outputs: &Value) {
        if step.variables.is_empty() {
            return;
        }
        let ctx = self.expression_context(outputs);
        for (name, expr) in &step.variables {
            let value = expression::resolve_str(expr, &ctx);
            debug!(variable = %name, "captured step variable");
            self.vars.insert(name.clone(), value);
        }
    }
}
